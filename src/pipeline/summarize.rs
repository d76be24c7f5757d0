//! Summarizer: stream the OCR aggregate through a text-generation endpoint.
//!
//! The endpoint answers with newline-delimited JSON, one frame per line:
//!
//! ```text
//! {"response":"Sum","done":false}
//! {"response":"mary","done":false}
//! {"response":"","done":true}
//! ```
//!
//! [`decode_chunks`] turns the raw byte stream into a lazy stream of decoded
//! frames; [`accumulate_summary`] concatenates fragments until the first
//! frame flagged `done`. Dropping the frame stream drops the HTTP response,
//! so the connection is released on every exit path.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// One decoded frame of a streamed generation response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Why a frame could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkError {
    /// One line was not a valid frame. Recoverable.
    Malformed { line: usize, detail: String },
    /// The underlying byte stream failed. Terminal.
    Read(String),
}

struct DecodeState<S> {
    inner: S,
    buf: Vec<u8>,
    line: usize,
    exhausted: bool,
}

fn decode_line(line_no: usize, raw: &[u8]) -> Result<GenerateChunk, ChunkError> {
    serde_json::from_slice(raw).map_err(|e| ChunkError::Malformed {
        line: line_no,
        detail: e.to_string(),
    })
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(|b| b.is_ascii_whitespace())
}

/// Split a byte stream into NDJSON lines and decode each one.
///
/// Blank lines are ignored. A trailing line without a final newline is still
/// decoded at end of stream. A read error is yielded once and ends the stream.
pub fn decode_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<GenerateChunk, ChunkError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = DecodeState {
        inner: bytes,
        buf: Vec::new(),
        line: 0,
        exhausted: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                st.line += 1;
                if is_blank(&raw) {
                    continue;
                }
                let frame = decode_line(st.line, &raw);
                return Some((frame, st));
            }

            if st.exhausted {
                if is_blank(&st.buf) {
                    return None;
                }
                let raw = std::mem::take(&mut st.buf);
                st.line += 1;
                let frame = decode_line(st.line, &raw);
                return Some((frame, st));
            }

            match st.inner.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.exhausted = true;
                    st.buf.clear();
                    return Some((Err(ChunkError::Read(e.to_string())), st));
                }
                None => st.exhausted = true,
            }
        }
    })
}

/// Concatenate frame fragments in order, stopping at the first `done` frame.
///
/// Malformed frames are logged and skipped; a read error fails the whole
/// summary. Stream exhaustion without a `done` frame returns what arrived.
pub async fn accumulate_summary<S>(frames: S) -> Result<String, PipelineError>
where
    S: Stream<Item = Result<GenerateChunk, ChunkError>>,
{
    let mut frames = std::pin::pin!(frames);
    let mut summary = String::new();

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(chunk) => {
                summary.push_str(&chunk.response);
                if chunk.done {
                    break;
                }
            }
            Err(ChunkError::Malformed { line, detail }) => {
                warn!(line, %detail, "Skipping malformed summary chunk");
            }
            Err(ChunkError::Read(detail)) => return Err(PipelineError::SummaryStream(detail)),
        }
    }

    Ok(summary)
}

/// Turns OCR text into a summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, ocr_text: &str) -> Result<String, PipelineError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

/// [`Summarizer`] for an Ollama-style `generate` endpoint with bearer auth.
pub struct StreamingSummarizer {
    config: Arc<PipelineConfig>,
    client: reqwest::Client,
}

impl StreamingSummarizer {
    pub fn new(config: Arc<PipelineConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl Summarizer for StreamingSummarizer {
    async fn summarize(&self, ocr_text: &str) -> Result<String, PipelineError> {
        let api_key = self
            .config
            .summary_api_key
            .as_deref()
            .ok_or(PipelineError::MissingCredential)?;

        let body = GenerateRequest {
            model: &self.config.summary_model,
            system: self.config.system_prompt(),
            prompt: ocr_text,
            stream: true,
            keep_alive: &self.config.keep_alive,
            options: GenerateOptions {
                num_predict: self.config.num_predict,
            },
        };

        debug!(
            model = %self.config.summary_model,
            prompt_bytes = ocr_text.len(),
            "Sending summarization request"
        );

        let response = self
            .client
            .post(&self.config.summary_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::SummaryRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::SummaryStatus {
                status: status.as_u16(),
                body,
            });
        }

        let summary = accumulate_summary(decode_chunks(Box::pin(response.bytes_stream()))).await?;
        debug!(summary_bytes = summary.len(), "Summary received");
        Ok(summary)
    }
}
