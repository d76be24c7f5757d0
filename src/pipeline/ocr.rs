//! OCR fan-out: recognise every page image concurrently, fail fast, reassemble in order.
//!
//! ## Shape
//!
//! ```text
//!             ┌─ task(page 3) ─┐
//! images ─────┼─ task(page 1) ─┼──▶ results (mpsc, one slot per page) ──┐
//!             └─ task(page 2) ─┘                                        ├─▶ collector
//!                   │ first failure                                     │
//!                   └──────────▶ error slot (mpsc, capacity 1) ─────────┘
//! ```
//!
//! Every page gets its own task; OCR calls are I/O-bound and independent, so
//! wall-clock time tracks the slowest page rather than the sum. All tasks
//! share one [`CancellationToken`]. The first task to fail claims the
//! single-slot error channel with `try_send` and cancels the token; later
//! failures find the slot full and are dropped. The collector waits for
//! exactly one outcome per image, racing the error slot against the results
//! channel, and returns the error as soon as it shows up.
//!
//! On the error path the collector does not wait for stragglers: the token is
//! cancelled on return, in-flight requests are abandoned at their next poll,
//! but the function returns before they have all quiesced.

use crate::error::OcrError;
use crate::pipeline::extract::PageImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One recognised text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    pub text: String,
    pub confidence: f64,
}

/// Body of a successful `POST /ocr` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub blocks: Vec<OcrBlock>,
}

/// OCR result of one page, paired with its page index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutcome {
    pub page: u32,
    pub blocks: Vec<OcrBlock>,
}

impl OcrOutcome {
    /// Concatenated block text, one block per line.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mean block confidence, or `None` for a page with no text.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.blocks.is_empty() {
            return None;
        }
        Some(self.blocks.iter().map(|b| b.confidence).sum::<f64>() / self.blocks.len() as f64)
    }
}

/// Extracts text from one page image.
#[async_trait]
pub trait OcrClient: Send + Sync {
    async fn recognize(&self, image: &PageImage) -> Result<OcrResult, OcrError>;
}

/// [`OcrClient`] for the HTTP OCR service (`POST {base}/ocr`, multipart field `file`).
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrClient {
    /// `base_url` without the `/ocr` suffix, e.g. `http://localhost:8000`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/ocr", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image: &PageImage) -> Result<OcrResult, OcrError> {
        let page = image.page;
        let bytes = tokio::fs::read(&image.path)
            .await
            .map_err(|e| OcrError::Io {
                page,
                detail: format!("{}: {e}", image.path.display()),
            })?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name(&image.path))
            .mime_str(mime_for(&image.path))
            .map_err(|e| OcrError::Request {
                page,
                detail: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OcrError::Request {
                page,
                detail: e.to_string(),
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(OcrError::Status {
                page,
                status: response.status().as_u16(),
            });
        }

        response.json::<OcrResult>().await.map_err(|e| OcrError::Decode {
            page,
            detail: e.to_string(),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page.png".to_string())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/png",
    }
}

/// Recognise all `images` concurrently and return outcomes sorted by page.
///
/// Returns the first page error if any request fails; a successful result
/// always holds exactly one outcome per distinct page index. When two images
/// carry the same index, only the one with the smallest path is sent.
pub async fn ocr_pages(
    client: Arc<dyn OcrClient>,
    images: Vec<PageImage>,
) -> Result<Vec<OcrOutcome>, OcrError> {
    let images = unique_pages(images);
    if images.is_empty() {
        return Err(OcrError::NoImages);
    }
    let expected = images.len();

    let cancel = CancellationToken::new();
    // Cancels whatever is still running on every return path.
    let _cancel_on_return = cancel.clone().drop_guard();

    let (result_tx, mut result_rx) = mpsc::channel::<OcrOutcome>(expected);
    let (error_tx, mut error_rx) = mpsc::channel::<OcrError>(1);

    for image in images {
        let client = Arc::clone(&client);
        let cancel = cancel.clone();
        let result_tx = result_tx.clone();
        let error_tx = error_tx.clone();

        tokio::spawn(async move {
            let page = image.page;
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(page, "OCR request abandoned after cancellation");
                    return;
                }
                result = client.recognize(&image) => result,
            };

            match result {
                Ok(ocr) => {
                    // Capacity equals the image count, so this never waits.
                    let _ = result_tx
                        .send(OcrOutcome {
                            page,
                            blocks: ocr.blocks,
                        })
                        .await;
                }
                Err(e) => {
                    warn!(page, error = %e, "OCR request failed");
                    if error_tx.try_send(e).is_ok() {
                        cancel.cancel();
                    }
                }
            }
        });
    }
    // Only the tasks hold senders now; both channels close once they all finish.
    drop(result_tx);
    drop(error_tx);

    let mut outcomes = Vec::with_capacity(expected);
    while outcomes.len() < expected {
        tokio::select! {
            biased;
            Some(err) = error_rx.recv() => return Err(err),
            Some(outcome) = result_rx.recv() => outcomes.push(outcome),
            else => {
                return Err(OcrError::Incomplete {
                    received: outcomes.len(),
                    expected,
                });
            }
        }
    }

    outcomes.sort_by_key(|o| o.page);
    Ok(outcomes)
}

/// Order images by `(page, path)` and keep the first image of each page.
fn unique_pages(mut images: Vec<PageImage>) -> Vec<PageImage> {
    images.sort_by(|a, b| a.page.cmp(&b.page).then_with(|| a.path.cmp(&b.path)));
    images.dedup_by(|dup, kept| {
        let same = dup.page == kept.page;
        if same {
            warn!(
                page = dup.page,
                kept = %kept.path.display(),
                ignored = %dup.path.display(),
                "Duplicate page index, ignoring image"
            );
        }
        same
    });
    images
}

/// Serialise outcomes as the deterministic aggregate stored on the job.
pub fn serialize_aggregate(outcomes: &[OcrOutcome]) -> Result<String, serde_json::Error> {
    serde_json::to_string(outcomes)
}
