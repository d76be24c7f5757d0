//! Persistence port for game-detail records.
//!
//! The pipeline only needs three operations: stream a bounded batch of
//! pending jobs, write a freshly computed OCR aggregate, and write the final
//! state. [`PgJobStore`] runs them against PostgreSQL; [`InMemoryJobStore`]
//! keeps records in a map for tests and dry runs.
//!
//! Updates are addressed by job identifier, so workers writing different
//! jobs never contend and no application-level locking is needed.

use crate::error::StoreError;
use crate::job::{Job, JobStatus};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Pending jobs, oldest (lowest id) first, at most `limit` of them.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Persist an OCR aggregate without touching summary or status.
    async fn save_ocr_result(&self, id: i64, ocr_result: &str) -> Result<(), StoreError>;

    /// Persist OCR result, summary and status of a job.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;
}

// ── PostgreSQL ────────────────────────────────────────────────────────────

/// Open a connection pool, retrying with exponential backoff.
#[instrument(skip(url))]
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let mut retries = 5;
    let mut delay = Duration::from_millis(500);

    loop {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
        {
            Ok(pool) => {
                info!("PostgreSQL connection pool established");
                return Ok(pool);
            }
            Err(e) if retries > 0 => {
                retries -= 1;
                warn!(
                    error = %e,
                    retries_left = retries,
                    delay_ms = delay.as_millis() as u64,
                    "PostgreSQL connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(StoreError::ConnectionFailed(e.to_string())),
        }
    }
}

pub struct PgJobStore {
    pool: PgPool,
    select_pending: String,
    update_ocr: String,
    update_job: String,
}

impl PgJobStore {
    /// `table` must already be validated as a plain identifier
    /// (see [`crate::config::PipelineConfigBuilder::build`]).
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            select_pending: format!(
                "SELECT id::bigint AS id, name, link_to_rules, link_to_illustration, editor, \
                 status, ocr_result, resume FROM {table} \
                 WHERE status = 'pending' ORDER BY id LIMIT $1"
            ),
            update_ocr: format!("UPDATE {table} SET ocr_result = $1 WHERE id = $2"),
            update_job: format!(
                "UPDATE {table} SET ocr_result = $1, resume = $2, status = $3 WHERE id = $4"
            ),
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let invalid = |e: sqlx::Error| StoreError::InvalidRow {
        id,
        detail: e.to_string(),
    };
    let text = |column: &str| -> Result<String, StoreError> {
        Ok(row
            .try_get::<Option<String>, _>(column)
            .map_err(invalid)?
            .unwrap_or_default())
    };

    let status = text("status")?
        .parse::<JobStatus>()
        .map_err(|detail| StoreError::InvalidRow { id, detail })?;

    Ok(Job {
        id,
        name: text("name")?,
        link_to_rules: text("link_to_rules")?,
        link_to_illustration: text("link_to_illustration")?,
        editor: text("editor")?,
        status,
        ocr_result: row.try_get("ocr_result").map_err(invalid)?,
        resume: row.try_get("resume").map_err(invalid)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&self.select_pending)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            // A single unreadable row must not sink the whole batch.
            match job_from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "Skipping unreadable job row"),
            }
        }
        debug!(count = jobs.len(), "Fetched pending jobs");
        Ok(jobs)
    }

    #[instrument(skip(self, ocr_result), fields(bytes = ocr_result.len()))]
    async fn save_ocr_result(&self, id: i64, ocr_result: &str) -> Result<(), StoreError> {
        let done = sqlx::query(&self.update_ocr)
            .bind(ocr_result)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = job.id, status = %job.status))]
    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let done = sqlx::query(&self.update_job)
            .bind(job.ocr_result.as_deref())
            .bind(job.resume.as_deref())
            .bind(job.status.as_str())
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id));
        }
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────

/// A write recorded by [`InMemoryJobStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    OcrResult { id: i64 },
    Update { id: i64, status: JobStatus },
}

/// Map-backed store with the same contract as [`PgJobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<BTreeMap<i64, Job>>,
    writes: Mutex<Vec<StoreWrite>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        store
            .lock_jobs()
            .extend(jobs.into_iter().map(|job| (job.id, job)));
        store
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.lock_jobs().get(&id).cloned()
    }

    /// Every write so far, in the order it happened.
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, BTreeMap<i64, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, write: StoreWrite) {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(write);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock_jobs()
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_ocr_result(&self, id: i64, ocr_result: &str) -> Result<(), StoreError> {
        {
            let mut jobs = self.lock_jobs();
            let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            job.ocr_result = Some(ocr_result.to_string());
        }
        self.record(StoreWrite::OcrResult { id });
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        {
            let mut jobs = self.lock_jobs();
            let stored = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
            stored.ocr_result = job.ocr_result.clone();
            stored.resume = job.resume.clone();
            stored.status = job.status;
        }
        self.record(StoreWrite::Update {
            id: job.id,
            status: job.status,
        });
        Ok(())
    }
}
