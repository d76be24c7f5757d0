//! Progress-callback trait for per-job pipeline events.
//!
//! Attach an `Arc<dyn JobProgressCallback>` with
//! [`crate::processor::JobProcessor::with_progress`] to receive events as
//! workers move jobs through the pipeline. The CLI renders them as a
//! progress bar; tests count them.
//!
//! # Example
//!
//! ```rust
//! use rules_digest::JobProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountFinished(AtomicUsize);
//!
//! impl JobProgressCallback for CountFinished {
//!     fn on_job_complete(&self, _worker: usize, _job_id: i64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::job::JobStage;
use std::sync::Arc;

/// Called by workers as they process jobs.
///
/// Workers run concurrently, so every method may be called from several
/// threads at once. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// Called once after the producer has fetched the batch.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called when a worker picks up a job.
    fn on_job_start(&self, worker: usize, job_id: i64, name: &str) {
        let _ = (worker, job_id, name);
    }

    /// Called when a job enters a pipeline stage.
    fn on_stage(&self, worker: usize, job_id: i64, stage: JobStage) {
        let _ = (worker, job_id, stage);
    }

    /// Called when a job reaches `finished` and has been persisted.
    fn on_job_complete(&self, worker: usize, job_id: i64) {
        let _ = (worker, job_id);
    }

    /// Called when a job is abandoned for this run.
    ///
    /// # Arguments
    /// * `error`: human-readable error description
    fn on_job_error(&self, worker: usize, job_id: i64, error: &str) {
        let _ = (worker, job_id, error);
    }

    /// Called once after every worker has exited.
    fn on_batch_complete(&self, finished: usize, failed: usize) {
        let _ = (finished, failed);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Shared handle type passed around the pool.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
