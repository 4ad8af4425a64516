//! Qdrant vector upserts with OpenAI-compatible embeddings.
//!
//! Text is embedded first, then stored as a single point. Qdrant only accepts
//! integer or UUID point ids, so string ids are hashed into a UUID and kept in
//! the payload as `doc_id`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::VectorStore;
use crate::config::VectorConfig;

/// Qdrant REST client plus the embedding endpoint feeding it
pub struct QdrantVectorStore {
    base_url: String,
    api_key: Option<String>,

    /// Embeddings endpoint; `None` turns upserts into no-ops
    embedding_url: Option<String>,

    embedding_model: String,
    embedding_api_key: Option<String>,
    client: reqwest::Client,

    /// Set once the disabled notice has been logged
    disabled_logged: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Deterministic point id for a string id
pub fn point_id(id: &str) -> Uuid {
    let digest = Sha256::digest(id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

impl QdrantVectorStore {
    /// Create from config
    pub fn from_config(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Qdrant HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding_url: config.embedding_url.clone().filter(|u| !u.is_empty()),
            embedding_model: config.embedding_model.clone(),
            embedding_api_key: config.embedding_api_key.clone(),
            client,
            disabled_logged: AtomicBool::new(false),
        })
    }

    /// Whether upserts actually reach Qdrant
    pub fn is_enabled(&self) -> bool {
        self.embedding_url.is_some()
    }

    async fn embed(&self, url: &str, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(url).json(&serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        }));
        if let Some(ref key) = self.embedding_api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("Failed to request embedding")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding error ({}): {}", status, text);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert_text(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let Some(ref embedding_url) = self.embedding_url else {
            if !self.disabled_logged.swap(true, Ordering::Relaxed) {
                info!("No embedding endpoint configured, vector upserts disabled");
            }
            return Ok(());
        };

        let vector = self.embed(embedding_url, text).await?;

        let mut point_payload = match payload {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        point_payload.insert("doc_id".to_string(), id.into());
        point_payload.insert("text".to_string(), text.into());

        let body = serde_json::json!({
            "points": [{
                "id": point_id(id).to_string(),
                "vector": vector,
                "payload": point_payload,
            }]
        });

        let mut request = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.base_url, collection
            ))
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.context("Failed to upsert to Qdrant")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Qdrant error ({}): {}", status, text);
        }

        debug!(collection, id, "upserted point");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id("job-1-00003"), point_id("job-1-00003"));
        assert_ne!(point_id("job-1-00003"), point_id("job-1-00004"));
    }

    #[tokio::test]
    async fn test_disabled_without_embedding_url() {
        let store = QdrantVectorStore::from_config(&VectorConfig::default()).unwrap();
        assert!(!store.is_enabled());

        // No network is touched when disabled
        store
            .upsert_text("raw-content", "job-1-00000", "hello", serde_json::json!({}))
            .await
            .unwrap();
    }
}
