//! Worker pool: N workers draining one shared job queue.
//!
//! ```text
//!                       ┌──▶ worker 0 ──┐
//! producer ──▶ queue ───┼──▶ worker 1 ──┼──▶ join barrier ──▶ PoolSummary
//!           (capacity 1) └──▶ worker 2 ──┘
//! ```
//!
//! The queue holds a single job, so the producer blocks until a worker is
//! free and at most N + 1 jobs are in flight. Closing the queue (dropping the
//! sender in [`WorkerPool::join`]) lets each worker finish its current job,
//! drain what is left, and exit. `join` returns once every worker has.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::Job;
use crate::processor::{JobOutcome, JobProcessor};
use crate::store::JobStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Per-worker tallies, returned when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker: usize,
    pub finished: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WorkerStats {
    pub fn processed(&self) -> usize {
        self.finished + self.skipped + self.failed
    }
}

/// Result of a drained pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// One entry per worker that exited normally, ordered by worker id.
    pub workers: Vec<WorkerStats>,
    /// Workers that panicked instead of returning stats.
    pub panicked: usize,
}

impl PoolSummary {
    pub fn finished(&self) -> usize {
        self.workers.iter().map(|w| w.finished).sum()
    }

    pub fn skipped(&self) -> usize {
        self.workers.iter().map(|w| w.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn processed(&self) -> usize {
        self.workers.iter().map(WorkerStats::processed).sum()
    }
}

pub struct WorkerPool {
    queue: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<WorkerStats>>,
    processor: Arc<JobProcessor>,
}

impl WorkerPool {
    /// Start `workers` workers sharing `processor`.
    pub fn spawn(processor: Arc<JobProcessor>, workers: usize) -> Self {
        let (queue, rx) = mpsc::channel::<Job>(1);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let processor = Arc::clone(&processor);
                tokio::spawn(run_worker(worker, rx, processor))
            })
            .collect();

        Self {
            queue,
            handles,
            processor,
        }
    }

    /// Hand a job to the next free worker, waiting while all are busy.
    pub async fn submit(&self, job: Job) -> Result<(), PipelineError> {
        self.queue.send(job).await.map_err(|e| {
            PipelineError::Internal(format!(
                "all workers exited before job {} was queued",
                e.0.id
            ))
        })
    }

    /// Close the queue and wait for every worker to exit.
    pub async fn join(self) -> PoolSummary {
        let WorkerPool {
            queue,
            handles,
            processor,
        } = self;
        drop(queue);

        let mut summary = PoolSummary::default();
        for handle in handles {
            match handle.await {
                Ok(stats) => summary.workers.push(stats),
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    summary.panicked += 1;
                }
            }
        }

        processor
            .progress()
            .on_batch_complete(summary.finished(), summary.failed());
        summary
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    processor: Arc<JobProcessor>,
) -> WorkerStats {
    let mut stats = WorkerStats {
        worker,
        ..Default::default()
    };

    loop {
        // The guard is released before processing so other workers can pull.
        let next = rx.lock().await.recv().await;
        let Some(job) = next else { break };

        let job_id = job.id;
        processor.progress().on_job_start(worker, job_id, &job.name);

        match processor.process(worker, job).await {
            Ok(JobOutcome::Finished) => {
                stats.finished += 1;
                processor.progress().on_job_complete(worker, job_id);
            }
            Ok(JobOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                error!(worker, job_id, error = %e, "Job failed, leaving it pending");
                processor.progress().on_job_error(worker, job_id, &e.to_string());
            }
        }
    }

    info!(
        worker,
        finished = stats.finished,
        failed = stats.failed,
        "Worker exiting, queue drained"
    );
    stats
}

/// Fetch one batch of pending jobs and push it through a fresh pool.
pub async fn run_batch(
    store: &dyn JobStore,
    processor: Arc<JobProcessor>,
    config: &PipelineConfig,
) -> Result<PoolSummary, PipelineError> {
    let jobs = store.fetch_pending(config.batch_size).await?;
    info!(count = jobs.len(), workers = config.workers, "Fetched pending jobs");
    processor.progress().on_batch_start(jobs.len());

    let pool = WorkerPool::spawn(processor, config.workers);
    for job in jobs {
        if let Err(e) = pool.submit(job).await {
            warn!(error = %e, "Stopping producer early");
            break;
        }
    }

    Ok(pool.join().await)
}
