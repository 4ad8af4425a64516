//! Elasticsearch document indexing over the REST API.
//!
//! Endpoint: PUT {url}/{index}/_doc/{id}
//! Auth: `ApiKey` header, basic auth, or none

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::SearchIndex;
use crate::config::SearchConfig;

#[derive(Debug, Clone)]
enum Auth {
    None,
    ApiKey(String),
    Basic { username: String, password: String },
}

/// Elasticsearch REST client
pub struct ElasticsearchIndex {
    base_url: String,
    auth: Auth,
    client: reqwest::Client,
}

impl ElasticsearchIndex {
    /// Create an unauthenticated client
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build Elasticsearch HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: Auth::None,
            client,
        })
    }

    /// Create from config; an API key wins over basic credentials
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let mut index = Self::new(config.url.clone())?;
        index.auth = match (&config.api_key, &config.username) {
            (Some(key), _) => Auth::ApiKey(key.clone()),
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: config.password.clone().unwrap_or_default(),
            },
            (None, None) => Auth::None,
        };
        Ok(index)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::ApiKey(key) => request.header("Authorization", format!("ApiKey {}", key)),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    fn document_url(&self, index: &str, doc_id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, index, doc_id)
    }

    /// Check that the cluster is reachable
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .authorize(self.client.get(&self.base_url))
            .send()
            .await
            .context("Elasticsearch unreachable")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            anyhow::bail!("Elasticsearch ping failed: status={}", status)
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn index_document(
        &self,
        index: &str,
        doc_id: &str,
        document: serde_json::Value,
    ) -> Result<()> {
        let response = self
            .authorize(self.client.put(self.document_url(index, doc_id)))
            .json(&document)
            .send()
            .await
            .context("Failed to send document to Elasticsearch")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Elasticsearch error ({}): {}", status, text)
        }
    }
}
