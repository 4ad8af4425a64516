//! Adapter interfaces for external systems.
//!
//! The ingestion pipeline talks to four capabilities, each behind a trait so
//! jobs can run against real services or in-memory fakes:
//! - ObjectStore: raw audio and transcript persistence
//! - TranscriptionEngine: speech-to-text for one audio file
//! - SearchIndex: full-text document indexing
//! - VectorStore: embedding upserts

pub mod elasticsearch;
pub mod storage;
pub mod qdrant;
pub mod whisper;
pub mod whisper_cli;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

// Re-export the concrete adapters
pub use elasticsearch::ElasticsearchIndex;
pub use storage::ObjectStoreBackend;
pub use qdrant::QdrantVectorStore;
pub use whisper::WhisperHttpEngine;
pub use whisper_cli::WhisperCliEngine;

/// Durable key/value blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, returning the key it was written to
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String>;
}

/// Speech-to-text for a single audio file
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Transcribe the file; the returned text may be empty for silence
    async fn transcribe_file(&self, path: &Path) -> Result<String>;
}

/// Full-text search index
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace a document
    async fn index_document(
        &self,
        index: &str,
        doc_id: &str,
        document: serde_json::Value,
    ) -> Result<()>;
}

/// Vector database receiving text embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed `text` and upsert it under `id` with the given payload
    async fn upsert_text(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}
