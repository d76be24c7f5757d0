//! Job processor: drives one job through extract → OCR → summarize → persist.
//!
//! The processor is stateless apart from its collaborators and is shared by
//! every worker behind an `Arc`. Stage selection comes from
//! [`Job::stage`]: a job that already carries OCR text goes straight to
//! summarization, and a finished job is left alone.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{Job, JobStage};
use crate::pipeline::extract::{discover_page_images, PageExtractor};
use crate::pipeline::ocr::{ocr_pages, serialize_aggregate, OcrClient};
use crate::pipeline::summarize::Summarizer;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// What happened to a job handed to [`JobProcessor::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job reached `finished` and was persisted.
    Finished,
    /// The job was already finished; nothing was done.
    Skipped,
}

pub struct JobProcessor {
    extractor: Arc<dyn PageExtractor>,
    ocr: Arc<dyn OcrClient>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn JobStore>,
    config: Arc<PipelineConfig>,
    progress: ProgressCallback,
}

impl JobProcessor {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        ocr: Arc<dyn OcrClient>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn JobStore>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            extractor,
            ocr,
            summarizer,
            store,
            config,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Report stage transitions to `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressCallback {
        &self.progress
    }

    /// Run `job` to completion.
    ///
    /// On error nothing beyond an eagerly persisted OCR aggregate has been
    /// written; the job stays `pending` in the store.
    pub async fn process(&self, worker: usize, mut job: Job) -> Result<JobOutcome, PipelineError> {
        let span = info_span!("job", worker, job_id = job.id);
        async move {
            if job.stage() == JobStage::Finished {
                debug!("Job already finished, skipping");
                return Ok(JobOutcome::Skipped);
            }

            if job.stage() == JobStage::NeedsOcr {
                self.progress.on_stage(worker, job.id, JobStage::NeedsOcr);
                self.run_ocr(&mut job).await?;
            } else {
                info!("OCR result present, skipping extraction");
            }

            self.progress.on_stage(worker, job.id, JobStage::NeedsSummary);
            self.run_summary(&mut job).await?;
            Ok(JobOutcome::Finished)
        }
        .instrument(span)
        .await
    }

    /// `NeedsOcr → NeedsSummary`.
    async fn run_ocr(&self, job: &mut Job) -> Result<(), PipelineError> {
        let dir = self.extractor.extract(job).await?;
        let images = discover_page_images(&dir).await?;
        if images.is_empty() {
            return Err(PipelineError::NoPageImages { job_id: job.id, dir });
        }

        let pages = images.len();
        info!(pages, "Running OCR");
        let outcomes = ocr_pages(Arc::clone(&self.ocr), images).await?;
        let aggregate = serialize_aggregate(&outcomes)?;
        job.record_ocr(aggregate)?;

        if self.config.persist_ocr_eagerly {
            if let Some(text) = job.ocr_text() {
                self.store.save_ocr_result(job.id, text).await?;
                debug!("OCR aggregate persisted");
            }
        }
        Ok(())
    }

    /// `NeedsSummary → Finished`.
    async fn run_summary(&self, job: &mut Job) -> Result<(), PipelineError> {
        let text = job
            .ocr_text()
            .ok_or_else(|| PipelineError::Internal(format!("job {} has no OCR text", job.id)))?;
        let summary = self.summarizer.summarize(text).await?;
        job.finish(summary)?;
        self.store.update(job).await?;
        info!("Job finished");
        Ok(())
    }
}
