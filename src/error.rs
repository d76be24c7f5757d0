//! Error types for the rules-digest pipeline.
//!
//! Three error types reflect three scopes of failure:
//!
//! * [`PipelineError`]: a whole job (or the process, for configuration
//!   problems) cannot proceed. Returned by every stage of
//!   [`crate::processor::JobProcessor`]; the worker logs it and moves on to
//!   its next job, leaving the failed job `pending`.
//!
//! * [`OcrError`]: a single page failed during the OCR fan-out. The first
//!   one observed wins and becomes the fan-out's result; later ones are
//!   dropped.
//!
//! * [`StoreError`]: the relational store rejected a read or a write.

use std::path::PathBuf;
use thiserror::Error;

/// All job-level and configuration errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required configuration value was not provided.
    #[error("Missing required configuration '{name}'\nSet it with --{flag} or the {env} environment variable.")]
    MissingConfig {
        name: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The summarization endpoint needs a credential that was not configured.
    #[error("No API key configured for the summarization service.\nSet OLLAMA_API or pass --api-key.")]
    MissingCredential,

    // ── Source errors ─────────────────────────────────────────────────────
    /// The rules PDF for a job does not exist under the PDF root.
    #[error("Rules PDF not found for job {job_id}: '{path}'")]
    SourcePdfNotFound { job_id: i64, path: PathBuf },

    /// The file exists but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// Downloading a missing rules PDF failed.
    #[error("Failed to download rules for job {job_id} from '{url}': {reason}")]
    DownloadFailed {
        job_id: i64,
        url: String,
        reason: String,
    },

    // ── Converter errors ──────────────────────────────────────────────────
    /// The PDF-to-image converter could not be started at all.
    #[error("Failed to launch converter '{program}': {source}\nIs it installed and on PATH?")]
    ConverterSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter ran but exited unsuccessfully.
    #[error("Converter exited with {status} for job {job_id}: {stderr}")]
    ConverterFailed {
        job_id: i64,
        status: String,
        stderr: String,
    },

    /// A filesystem operation on a pipeline path failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Extraction succeeded but produced no recognisable page image.
    #[error("No page images found for job {job_id} in '{dir}'")]
    NoPageImages { job_id: i64, dir: PathBuf },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR fan-out failed; carries the first page error observed.
    #[error(transparent)]
    Ocr(#[from] OcrError),

    // ── Summarizer errors ─────────────────────────────────────────────────
    /// The summarization request could not be sent.
    #[error("Summarization request failed: {0}")]
    SummaryRequest(String),

    /// The summarization service answered with a non-success status.
    #[error("Summarization service returned HTTP {status}: {body}")]
    SummaryStatus { status: u16, body: String },

    /// Reading the streamed summarization response failed midway.
    #[error("Error reading streamed summary: {0}")]
    SummaryStream(String),

    // ── Persistence errors ────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── State machine errors ──────────────────────────────────────────────
    /// A job was asked to move between stages that are not adjacent.
    #[error("Illegal transition for job {job_id}: {from} → {to}")]
    IllegalTransition {
        job_id: i64,
        from: &'static str,
        to: &'static str,
    },

    /// The OCR aggregate could not be serialised.
    #[error("Failed to serialise OCR aggregate: {0}")]
    Serialize(#[from] serde_json::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether this error means the process is misconfigured rather than the
    /// job being bad. Configuration errors are never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingConfig { .. }
                | PipelineError::InvalidConfig(_)
                | PipelineError::MissingCredential
        )
    }
}

/// A failure of the OCR fan-out, usually tied to one page.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OcrError {
    /// The page image could not be read from disk.
    #[error("Page {page}: cannot read image: {detail}")]
    Io { page: u32, detail: String },

    /// The HTTP request to the OCR service failed.
    #[error("Page {page}: OCR request failed: {detail}")]
    Request { page: u32, detail: String },

    /// The OCR service answered with a non-200 status.
    #[error("Page {page}: OCR service returned HTTP {status}")]
    Status { page: u32, status: u16 },

    /// The OCR response body was not the expected JSON.
    #[error("Page {page}: malformed OCR response: {detail}")]
    Decode { page: u32, detail: String },

    /// The fan-out was called with nothing to do.
    #[error("OCR fan-out called with no page images")]
    NoImages,

    /// Every OCR task went away before all pages were reported.
    #[error("OCR fan-out ended with {received}/{expected} pages and no error reported")]
    Incomplete { received: usize, expected: usize },
}

/// Errors raised by a [`crate::store::JobStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("Invalid row for job {id}: {detail}")]
    InvalidRow { id: i64, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_names_flag_and_env() {
        let e = PipelineError::MissingConfig {
            name: "pdf_root",
            flag: "pdf-root",
            env: "RULES_PDF_PATH",
        };
        let msg = e.to_string();
        assert!(msg.contains("--pdf-root"), "got: {msg}");
        assert!(msg.contains("RULES_PDF_PATH"), "got: {msg}");
        assert!(e.is_config());
    }

    #[test]
    fn ocr_error_is_transparent() {
        let e: PipelineError = OcrError::Status { page: 2, status: 500 }.into();
        assert_eq!(e.to_string(), "Page 2: OCR service returned HTTP 500");
        assert!(!e.is_config());
    }

    #[test]
    fn illegal_transition_display() {
        let e = PipelineError::IllegalTransition {
            job_id: 7,
            from: "needs_ocr",
            to: "finished",
        };
        assert!(e.to_string().contains("job 7"));
        assert!(e.to_string().contains("needs_ocr → finished"));
    }

    #[test]
    fn incomplete_display() {
        let e = OcrError::Incomplete {
            received: 1,
            expected: 3,
        };
        assert!(e.to_string().contains("1/3"));
    }

    #[test]
    fn missing_credential_is_config() {
        assert!(PipelineError::MissingCredential.is_config());
    }
}
