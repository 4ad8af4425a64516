//! Ingestion error taxonomy.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Per-segment pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Transcribe,
    PersistText,
    Index,
    Embed,
    Publish,
}

impl Stage {
    /// Failures in fatal stages abort the segment
    pub fn is_fatal(&self) -> bool {
        matches!(self, Stage::Upload | Stage::Transcribe)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Transcribe => "transcribe",
            Stage::PersistText => "persist_text",
            Stage::Index => "index",
            Stage::Embed => "embed",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure for one segment
#[derive(Debug, Error)]
#[error("segment {segment_index} failed at {stage}: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub segment_index: u64,
    #[source]
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, segment_index: u64, source: anyhow::Error) -> Self {
        Self {
            stage,
            segment_index,
            source,
        }
    }
}

/// Job-level errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot create working directory {path}: {source}")]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start segmenter: {0}")]
    SegmenterSpawn(#[source] std::io::Error),

    #[error("segmenter exited with {0}")]
    SegmenterFailed(String),

    #[error("no segment succeeded: {0}")]
    SegmentFailed(#[from] StageError),

    #[error("queue is full")]
    QueueSaturated,

    #[error("job cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether the job ended because its cancellation token fired
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}
