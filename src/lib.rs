//! # rules-digest
//!
//! Turn a backlog of board-game rule PDFs into short summaries.
//!
//! Each pending `game_detail` record goes through a four-stage pipeline:
//! the rules PDF is rasterised into page images, every page is sent to an
//! OCR service concurrently, the ordered OCR aggregate is streamed through a
//! text-generation endpoint, and the summary is written back.
//!
//! ## Pipeline Overview
//!
//! ```text
//! store (pending jobs, oldest first)
//!  │
//!  ├─ producer ──▶ queue (1 slot) ──▶ N workers
//!  │
//!  └─ per job:
//!      ├─ 1. Source     <pdf_root>/<id>.pdf, optionally downloaded
//!      ├─ 2. Extract    external converter → <image_root>/<id>/page-N.png
//!      ├─ 3. OCR        one request per page, first error wins, sorted by page
//!      ├─ 4. Summarize  streamed NDJSON until the first `done` frame
//!      └─ 5. Persist    status = finished, ocr_result, resume
//! ```
//!
//! A job whose OCR result is already stored skips steps 1–3. A failure at any
//! step abandons that job only; it stays `pending` for the next run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rules_digest::{
//!     build_http_client, run_batch, store, ConverterExtractor, HttpOcrClient, JobProcessor,
//!     PgJobStore, PipelineConfig, StreamingSummarizer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(
//!         PipelineConfig::builder()
//!             .pdf_root("/data/rules")
//!             .image_root("/data/images")
//!             .summary_api_key(std::env::var("OLLAMA_API").ok())
//!             .build()?,
//!     );
//!     let client = build_http_client(&config)?;
//!     let pool = store::connect("postgres://localhost/games", 5).await?;
//!     let store = Arc::new(PgJobStore::new(pool, &config.table));
//!
//!     let processor = Arc::new(JobProcessor::new(
//!         Arc::new(ConverterExtractor::new(config.clone(), client.clone())),
//!         Arc::new(HttpOcrClient::new(client.clone(), &config.ocr_url)),
//!         Arc::new(StreamingSummarizer::new(config.clone(), client)),
//!         store.clone(),
//!         config.clone(),
//!     ));
//!     let summary = run_batch(store.as_ref(), processor, &config).await?;
//!     eprintln!("{} finished, {} failed", summary.finished(), summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rules-digest` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod pool;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{build_http_client, PipelineConfig, PipelineConfigBuilder};
pub use error::{OcrError, PipelineError, StoreError};
pub use job::{Job, JobStage, JobStatus};
pub use pipeline::extract::{ConverterExtractor, PageExtractor, PageImage};
pub use pipeline::ocr::{HttpOcrClient, OcrBlock, OcrClient, OcrOutcome, OcrResult};
pub use pipeline::summarize::{StreamingSummarizer, Summarizer};
pub use pool::{run_batch, PoolSummary, WorkerPool, WorkerStats};
pub use processor::{JobOutcome, JobProcessor};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{InMemoryJobStore, JobStore, PgJobStore};
