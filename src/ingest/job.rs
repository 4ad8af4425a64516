//! One ingestion job: segmenter + watcher + processor for a single URL.
//!
//! State machine: `Starting → Running → Draining → Done`.
//!
//! The job ends when its token is cancelled (after the in-flight segment
//! finishes) or when the segmenter exits (after one final scan with nothing
//! held back).

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{IngestError, StageError};
use super::processor::ChunkProcessor;
use super::segmenter::{Segmenter, SegmenterExit};
use super::watcher::SegmentWatcher;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Starting,
    Running,
    Draining,
    Done,
}

/// What a finished job did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub job_id: String,

    /// Segments handed to the processor
    pub processed: usize,

    /// Segments that cleared both fatal stages
    pub succeeded: usize,

    /// Segments aborted by a fatal stage
    pub failed: usize,

    /// File names that looked like segments but had no parseable index
    pub skipped_names: Vec<String>,
}

/// A single ingestion job
pub struct IngestJob {
    job_id: String,
    source_url: String,
    work_dir: PathBuf,
    segmenter: Segmenter,
    poll_interval: Duration,
    processor: ChunkProcessor,
    watcher: SegmentWatcher,
    state: JobState,
    summary: JobSummary,
    last_error: Option<StageError>,
}

impl IngestJob {
    /// Create a job working in `work_root/<job_id>`
    pub fn new(
        job_id: impl Into<String>,
        source_url: impl Into<String>,
        work_root: impl Into<PathBuf>,
        segmenter: Segmenter,
        poll_interval: Duration,
        processor: ChunkProcessor,
    ) -> Self {
        let job_id = job_id.into();
        let work_dir = work_root.into().join(&job_id);
        Self {
            summary: JobSummary {
                job_id: job_id.clone(),
                ..Default::default()
            },
            watcher: SegmentWatcher::new(work_dir.clone()),
            job_id,
            source_url: source_url.into(),
            work_dir,
            segmenter,
            poll_interval,
            processor,
            state: JobState::Starting,
            last_error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        debug!(job_id = %self.job_id, from = ?self.state, to = ?next, "job state");
        self.state = next;
    }

    /// Run the job to completion or cancellation
    #[instrument(skip_all, fields(job_id = %self.job_id, source_url = %self.source_url))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<JobSummary, IngestError> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| IngestError::ResourceUnavailable {
                path: self.work_dir.clone(),
                source,
            })?;

        let mut process = self
            .segmenter
            .spawn(&self.job_id, &self.source_url, &self.work_dir)?;
        self.transition(JobState::Running);
        info!(dir = %self.work_dir.display(), "ingest job running");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let wait = process.wait(&cancel);
        tokio::pin!(wait);

        let exit = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.transition(JobState::Draining);
                    // Kills the segmenter and reaps it
                    break (&mut wait).await;
                }

                exit = &mut wait => {
                    self.transition(JobState::Draining);
                    if !matches!(exit, SegmenterExit::Cancelled) {
                        // Everything on disk is complete now
                        self.process_ready(false, &cancel).await;
                    }
                    break exit;
                }

                _ = ticker.tick() => {
                    self.process_ready(true, &cancel).await;
                }
            }
        };

        self.transition(JobState::Done);
        self.summary.skipped_names = self.watcher.skipped_names();
        info!(
            processed = self.summary.processed,
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            ?exit,
            "ingest job done"
        );

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        match exit {
            SegmenterExit::Finished => {}
            SegmenterExit::Failed(status) => return Err(IngestError::SegmenterFailed(status)),
            SegmenterExit::Cancelled => return Err(IngestError::Cancelled),
        }

        match self.last_error.take() {
            Some(err) if self.summary.succeeded == 0 => Err(IngestError::SegmentFailed(err)),
            _ => Ok(self.summary),
        }
    }

    /// One watcher iteration: process every ready segment in index order
    async fn process_ready(&mut self, hold_back_latest: bool, cancel: &CancellationToken) {
        let ready = match self.watcher.scan(hold_back_latest).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(dir = %self.work_dir.display(), error = %e, "scan failed");
                return;
            }
        };

        for segment in ready {
            if cancel.is_cancelled() {
                break;
            }
            if !self.watcher.mark_processed(&segment) {
                continue;
            }

            self.summary.processed += 1;
            match self.processor.process(&segment).await {
                Ok(_) => self.summary.succeeded += 1,
                Err(e) => {
                    warn!(
                        job_id = %self.job_id,
                        source_url = %self.source_url,
                        segment_index = segment.index,
                        stage = %e.stage,
                        error = %e,
                        "segment failed"
                    );
                    self.summary.failed += 1;
                    self.last_error = Some(e);
                }
            }
        }
    }
}
