//! Transcription service: the synchronous entry point for one job.
//!
//! Validates input, picks a job id, builds an [`IngestJob`] and runs it to
//! completion. Concurrency limits live with the callers (dispatcher, pool).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::ResolvedConfig;
use crate::domain::{generate_job_id, validate_job_id};
use crate::ingest::{
    Capabilities, ChunkProcessor, IngestError, IngestJob, JobSummary, ProcessorSettings, Segmenter,
};

/// Anything that can run one ingestion job to completion
#[async_trait]
pub trait Ingest: Send + Sync {
    /// Ingest `url` under `job_id` (generated when empty) until the source
    /// ends or `cancel` fires
    async fn ingest_url(
        &self,
        url: &str,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobSummary, IngestError>;
}

/// Job-independent settings of the service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of every job's working directory
    pub work_root: PathBuf,
    pub poll_interval: Duration,
    pub processor: ProcessorSettings,
}

impl ServiceConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            work_root: config.transcribe.work_dir.clone(),
            poll_interval: config.poll_interval(),
            processor: ProcessorSettings::from_config(config),
        }
    }
}

/// Builds and runs ingest jobs
pub struct TranscriptionService {
    caps: Capabilities,
    segmenter: Segmenter,
    config: ServiceConfig,
}

impl TranscriptionService {
    pub fn new(caps: Capabilities, segmenter: Segmenter, config: ServiceConfig) -> Self {
        Self {
            caps,
            segmenter,
            config,
        }
    }
}

#[async_trait]
impl Ingest for TranscriptionService {
    #[instrument(skip(self, cancel), fields(source_url = %url))]
    async fn ingest_url(
        &self,
        url: &str,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobSummary, IngestError> {
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

        info!(job_id = %job_id, "starting ingest job");
        let processor = ChunkProcessor::new(
            self.caps.clone(),
            self.config.processor.clone(),
            job_id.clone(),
            url,
        );
        let job = IngestJob::new(
            job_id,
            url,
            self.config.work_root.clone(),
            self.segmenter.clone(),
            self.config.poll_interval,
            processor,
        );
        job.run(cancel).await
    }
}
