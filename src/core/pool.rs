//! In-memory worker pool: the non-durable alternative to the dispatcher.
//!
//! Jobs wait in a bounded queue and run on a fixed number of workers. Queued
//! jobs are lost if the process exits, so this is only used for local runs
//! that do not go through the bus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::dispatcher::DispatchError;
use super::service::Ingest;
use crate::domain::{generate_job_id, validate_job_id};
use crate::ingest::{IngestError, JobSummary};

#[derive(Debug)]
struct QueuedJob {
    url: String,
    job_id: String,
}

/// Result of one pooled job
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub url: String,
    pub result: Result<JobSummary, IngestError>,
}

/// Bounded queue plus fixed workers
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Start `workers` workers behind a queue of `queue_size`.
    ///
    /// Outcomes arrive on the returned receiver, which closes once every
    /// worker has exited.
    pub fn start(
        ingestor: Arc<dyn Ingest>,
        workers: usize,
        queue_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>) {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(queue_size.max(1));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        for worker in 0..workers.max(1) {
            let receiver = receiver.clone();
            let ingestor = ingestor.clone();
            let cancel = cancel.clone();
            let outcome_tx = outcome_tx.clone();

            tracker.spawn(async move {
                loop {
                    let next = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            job = receiver.recv() => job,
                        }
                    };
                    let Some(job) = next else { break };

                    info!(worker, job_id = %job.job_id, source_url = %job.url, "worker picked job");
                    let result = ingestor
                        .ingest_url(&job.url, &job.job_id, cancel.child_token())
                        .await;
                    let _ = outcome_tx.send(JobOutcome {
                        job_id: job.job_id,
                        url: job.url,
                        result,
                    });
                }
            });
        }

        let pool = Self {
            sender: Mutex::new(Some(sender)),
            cancel,
            tracker,
        };
        (pool, outcome_rx)
    }

    /// Queue a job without waiting; a full queue is refused, not awaited
    pub fn submit(&self, url: &str, job_id: &str) -> Result<String, IngestError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(IngestError::InvalidInput("url is required".to_string()));
        }
        let job_id = if job_id.is_empty() {
            generate_job_id()
        } else {
            job_id.to_string()
        };
        validate_job_id(&job_id).map_err(IngestError::InvalidInput)?;

        let guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let sender = guard.as_ref().ok_or(IngestError::Cancelled)?;
        match sender.try_send(QueuedJob {
            url: url.to_string(),
            job_id: job_id.clone(),
        }) {
            Ok(()) => Ok(job_id),
            Err(TrySendError::Full(_)) => {
                warn!(job_id = %job_id, "queue full, refusing job");
                Err(IngestError::QueueSaturated)
            }
            Err(TrySendError::Closed(_)) => Err(IngestError::Cancelled),
        }
    }

    /// Stop accepting jobs; workers exit once the queue is empty
    pub fn close(&self) {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.tracker.close();
    }

    /// Cancel running jobs and wait for workers to exit
    pub async fn stop(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.close();
        self.cancel.cancel();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .map_err(|_| DispatchError::DrainTimeout(timeout))
    }

    /// Wait for workers to finish the queue after [`close`](Self::close)
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}
