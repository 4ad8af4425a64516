//! Emits ingestion requests onto the bus.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use super::EventBus;
use crate::domain::{generate_job_id, validate_job_id, IngestionRequest};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("bus error: {0}")]
    Bus(#[from] anyhow::Error),
}

/// Publishes [`IngestionRequest`]s on the request subject
pub struct RequestPublisher {
    bus: Arc<dyn EventBus>,
    subject: String,
}

impl RequestPublisher {
    pub fn new(bus: Arc<dyn EventBus>, subject: impl Into<String>) -> Self {
        Self {
            bus,
            subject: subject.into(),
        }
    }

    /// Publish a request and return the job id it was published under.
    ///
    /// An empty `job_id` is replaced by a generated one.
    pub async fn publish_request(&self, url: &str, job_id: &str) -> Result<String, PublishError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PublishError::InvalidInput("url is required".to_string()));
        }

        let job_id = if job_id.is_empty() {
            generate_job_id()
        } else {
            validate_job_id(job_id).map_err(PublishError::InvalidInput)?;
            job_id.to_string()
        };

        let request = IngestionRequest::new(url, job_id.clone());
        let payload = serde_json::to_vec(&request)?;
        self.bus.publish(&self.subject, Bytes::from(payload)).await?;

        info!(job_id = %job_id, source_url = %url, subject = %self.subject, "published ingestion request");
        Ok(job_id)
    }
}
