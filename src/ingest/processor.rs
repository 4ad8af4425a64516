//! Per-segment processing pipeline.
//!
//! | Stage        | On failure                         |
//! |--------------|------------------------------------|
//! | upload       | abort the segment                  |
//! | transcribe   | abort the segment                  |
//! | persist_text | log and continue                   |
//! | index        | log and continue                   |
//! | embed        | log and continue                   |
//! | publish      | log and continue (window still moves) |

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use super::error::{Stage, StageError};
use crate::adapters::{ObjectStore, SearchIndex, TranscriptionEngine, VectorStore};
use crate::bus::EventBus;
use crate::config::ResolvedConfig;
use crate::domain::segment::segment_file_name;
use crate::domain::{Segment, SegmentReadyEvent, SlidingWindow, SEGMENT_READY};

/// External capabilities a job depends on
#[derive(Clone)]
pub struct Capabilities {
    pub store: Arc<dyn ObjectStore>,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub search: Arc<dyn SearchIndex>,
    pub vectors: Arc<dyn VectorStore>,
    pub bus: Arc<dyn EventBus>,
}

/// Static settings shared by every job
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub segment_seconds: u32,
    pub window_size: usize,
    pub search_index: String,
    pub vector_collection: String,
    pub segment_ready_subject: String,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from_config(&ResolvedConfig::default())
    }
}

impl ProcessorSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            segment_seconds: config.transcribe.segment_seconds,
            window_size: config.transcribe.window_size,
            search_index: config.search.index.clone(),
            vector_collection: config.vector.collection.clone(),
            segment_ready_subject: config.bus.segment_ready_subject.clone(),
        }
    }
}

/// Storage key of a segment's raw audio
pub fn raw_key(job_id: &str, index: u64) -> String {
    format!("raw/{}/{}", job_id, segment_file_name(index, "wav"))
}

/// Storage key of a segment's transcript
pub fn text_key(job_id: &str, index: u64) -> String {
    format!("raw/{}/{}", job_id, segment_file_name(index, "txt"))
}

/// Search document id of a segment
pub fn document_id(job_id: &str, index: u64) -> String {
    format!("{}-{:05}", job_id, index)
}

/// Runs segments of one job through the stages, owning the job's window
pub struct ChunkProcessor {
    caps: Capabilities,
    settings: ProcessorSettings,
    job_id: String,
    source_url: String,
    window: SlidingWindow,
}

impl ChunkProcessor {
    pub fn new(
        caps: Capabilities,
        settings: ProcessorSettings,
        job_id: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let window = SlidingWindow::new(settings.window_size);
        Self {
            caps,
            settings,
            job_id: job_id.into(),
            source_url: source_url.into(),
            window,
        }
    }

    /// Current window contents
    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Process one segment; only the fatal stages return an error
    pub async fn process(&mut self, segment: &Segment) -> Result<SegmentReadyEvent, StageError> {
        let index = segment.index;
        let fatal = |stage: Stage| move |e: anyhow::Error| StageError::new(stage, index, e);

        // 1. Upload raw audio
        let audio = tokio::fs::read(&segment.path)
            .await
            .map_err(|e| StageError::new(Stage::Upload, index, e.into()))?;
        let object_key = self
            .caps
            .store
            .put(&raw_key(&self.job_id, index), Bytes::from(audio), "audio/wav")
            .await
            .map_err(fatal(Stage::Upload))?;

        // 2. Transcribe
        let text = self
            .caps
            .engine
            .transcribe_file(&segment.path)
            .await
            .map_err(fatal(Stage::Transcribe))?;
        let text = text.trim().to_string();

        // 3. Persist transcript
        let text_object_key = text_key(&self.job_id, index);
        if let Err(e) = self.persist_text(&segment.path, &text_object_key, &text).await {
            self.soft_failure(Stage::PersistText, index, &e);
        }

        // 4. Index
        let created_at = Utc::now();
        let document = json!({
            "job_id": self.job_id,
            "source_url": self.source_url,
            "segment_index": index,
            "segment_seconds": self.settings.segment_seconds,
            "text": text,
            "object_key": object_key,
            "text_object_key": text_object_key,
            "created_at": created_at.to_rfc3339(),
        });
        let doc_id = document_id(&self.job_id, index);
        if let Err(e) = self
            .caps
            .search
            .index_document(&self.settings.search_index, &doc_id, document)
            .await
        {
            self.soft_failure(Stage::Index, index, &e);
        }

        // 5. Embed
        let metadata = json!({
            "job_id": self.job_id,
            "segment_index": index,
            "source_url": self.source_url,
        });
        if let Err(e) = self
            .caps
            .vectors
            .upsert_text(&self.settings.vector_collection, &doc_id, &text, metadata)
            .await
        {
            self.soft_failure(Stage::Embed, index, &e);
        }

        // 6. Window + publish
        let window_text = self.window.push(text.clone());
        let event = SegmentReadyEvent {
            event: SEGMENT_READY.to_string(),
            source_url: self.source_url.clone(),
            job_id: self.job_id.clone(),
            segment_index: index,
            segment_seconds: self.settings.segment_seconds,
            segment_text: text,
            window_text,
            object_key,
            created_at,
        };
        if let Err(e) = self.publish(&event).await {
            self.soft_failure(Stage::Publish, index, &e);
        }

        info!(
            job_id = %self.job_id,
            segment_index = index,
            window_len = self.window.len(),
            "segment processed"
        );
        Ok(event)
    }

    /// Write the transcript next to the audio, then upload it
    async fn persist_text(&self, audio_path: &Path, key: &str, text: &str) -> anyhow::Result<()> {
        let local = audio_path.with_extension("txt");
        if let Err(e) = tokio::fs::write(&local, text).await {
            debug!(path = %local.display(), error = %e, "could not write local transcript");
        }
        self.caps
            .store
            .put(key, Bytes::from(text.to_string()), "text/plain; charset=utf-8")
            .await?;
        Ok(())
    }

    async fn publish(&self, event: &SegmentReadyEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.caps
            .bus
            .publish(&self.settings.segment_ready_subject, Bytes::from(payload))
            .await
    }

    fn soft_failure(&self, stage: Stage, index: u64, error: &anyhow::Error) {
        warn!(
            job_id = %self.job_id,
            source_url = %self.source_url,
            segment_index = index,
            stage = %stage,
            error = %error,
            "stage failed, continuing"
        );
    }
}
