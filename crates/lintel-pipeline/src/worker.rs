//! Fixed-size worker pool.
//!
//! N workers pull jobs from a shared [`JobSource`] until it drains.
//! Each job runs synchronously on the blocking thread pool — one job
//! per worker slot, so CPU-heavy validation on one job cannot starve
//! another worker's async machinery. A per-job timeout is the only
//! interruption mechanism: on expiry the job is marked failed, never
//! left half-validated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::job::{JobRecord, JobState};
use crate::orchestrator::Orchestrator;
use crate::queue::JobSource;

/// Pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    /// Number of parallel worker slots.
    pub workers: usize,
    /// Per-job timeout.
    pub job_timeout: Duration,
}

impl WorkerPool {
    /// A pool with `workers` slots and the given per-job timeout.
    #[must_use]
    pub const fn new(workers: usize, job_timeout: Duration) -> Self {
        Self {
            workers,
            job_timeout,
        }
    }

    /// Drain the source, returning every job record.
    ///
    /// Records arrive in completion order, not submission order.
    pub async fn run(
        &self,
        source: Arc<dyn JobSource>,
        orchestrator: Arc<Orchestrator>,
    ) -> Vec<JobRecord> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(self.workers.max(1));

        for slot in 0..self.workers.max(1) {
            let source = Arc::clone(&source);
            let orchestrator = Arc::clone(&orchestrator);
            let tx = tx.clone();
            let timeout = self.job_timeout;

            handles.push(tokio::spawn(async move {
                while let Some(job) = source.next_job() {
                    let job_id = job.id.clone();
                    let orchestrator = Arc::clone(&orchestrator);
                    let work =
                        tokio::task::spawn_blocking(move || orchestrator.process_job(&job));

                    let record = match tokio::time::timeout(timeout, work).await {
                        Ok(Ok(record)) => record,
                        Ok(Err(join_err)) => {
                            error!(job = %job_id, error = %join_err, "job task panicked");
                            failed_record(&job_id, "internal error during validation")
                        }
                        Err(_elapsed) => {
                            // The blocking task cannot be interrupted;
                            // it finishes in the background while this
                            // slot moves on. The job is failed either
                            // way.
                            warn!(job = %job_id, timeout_secs = timeout.as_secs(), "job timed out");
                            failed_record(&job_id, "job timed out")
                        }
                    };

                    if tx.send(record).is_err() {
                        break;
                    }
                }
                info!(slot, "worker slot drained");
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker slot panicked");
            }
        }

        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }
}

fn failed_record(job_id: &crate::cache::JobId, reason: &str) -> JobRecord {
    let mut record = JobRecord::begin(job_id.clone());
    record.state = JobState::Error;
    record.failure = Some(reason.to_owned());
    record
}
