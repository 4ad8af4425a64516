//! Event payloads exchanged over the event bus.
//!
//! Both payloads are JSON with snake_case fields. Evolve them by adding
//! fields only; consumers ignore fields they do not know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event name carried in every ingestion request payload
pub const INGESTION_REQUESTED: &str = "IngestionRequested";

/// Event name carried in every segment-ready payload
pub const SEGMENT_READY: &str = "SegmentReady";

/// A request to start ingesting a source URL.
///
/// Produced by the intake surface and immutable once published. The `job_id`
/// is the idempotency key for any retry logic; the core never deduplicates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRequest {
    /// Event name (always [`INGESTION_REQUESTED`] when produced here)
    #[serde(default = "default_request_event")]
    pub event: String,

    /// Source stream URL
    pub url: String,

    /// Caller-supplied job id; empty means "generate one"
    #[serde(default)]
    pub job_id: String,

    /// When the request was published
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

fn default_request_event() -> String {
    INGESTION_REQUESTED.to_string()
}

/// Reasons an incoming payload cannot be turned into a request
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("undeserializable payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("missing url in event")]
    MissingUrl,
}

impl IngestionRequest {
    /// Create a request stamped with the current time
    pub fn new(url: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            event: default_request_event(),
            url: url.into(),
            job_id: job_id.into(),
            requested_at: Utc::now(),
        }
    }

    /// Decode a bus payload, rejecting anything without a usable url
    pub fn from_payload(payload: &[u8]) -> Result<Self, MalformedEvent> {
        let request: Self = serde_json::from_slice(payload)?;
        if request.url.trim().is_empty() {
            return Err(MalformedEvent::MissingUrl);
        }
        Ok(request)
    }
}

/// Published once per successfully transcribed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentReadyEvent {
    /// Event name (always [`SEGMENT_READY`])
    pub event: String,

    pub source_url: String,

    pub job_id: String,

    /// Index parsed from the segment file name
    pub segment_index: u64,

    /// Nominal segment duration
    pub segment_seconds: u32,

    /// Transcript of this segment alone
    pub segment_text: String,

    /// Space-joined transcripts of the sliding window, oldest first
    pub window_text: String,

    /// Storage key of the raw segment audio
    pub object_key: String,

    pub created_at: DateTime<Utc>,
}

/// Generate a job id from the current time.
///
/// Monotonic within a process run; not guaranteed unique across restarts.
pub fn generate_job_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("job-{}", nanos)
}

/// Check that a job id can safely name a working directory
pub fn validate_job_id(job_id: &str) -> Result<(), String> {
    if job_id.is_empty() {
        return Err("job id is empty".to_string());
    }
    if job_id == "." || job_id.contains("..") {
        return Err(format!("job id '{}' contains a relative path component", job_id));
    }
    if job_id.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(format!("job id '{}' contains a path separator or control character", job_id));
    }
    Ok(())
}
