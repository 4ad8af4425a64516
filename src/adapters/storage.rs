//! Object storage backed by the `object_store` crate.
//!
//! Local filesystem for development, any S3-compatible endpoint in production.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, DynObjectStore, PutOptions, PutPayload};
use tracing::{debug, info};

use super::ObjectStore;
use crate::config::{StorageBackendKind, StorageConfig};

/// Unified storage wrapping an `object_store` implementation
pub struct ObjectStoreBackend {
    store: Arc<DynObjectStore>,

    /// Prefix joined in front of every key (no trailing slash)
    prefix: String,

    /// Remote stores accept content-type attributes; the local one does not
    supports_attributes: bool,
}

impl ObjectStoreBackend {
    /// Wrap an existing store
    pub fn new(store: Arc<DynObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            supports_attributes: false,
        }
    }

    /// Local filesystem rooted at `dir`, created if missing
    pub fn local(dir: &Path, prefix: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage dir: {}", dir.display()))?;
        let canonical = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .context("Failed to open local object store")?;
        info!("Storage: local backend at {}", canonical.display());
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// S3-compatible bucket
    pub fn s3(config: &StorageConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_region(&config.region)
            .with_bucket_name(&config.bucket);

        if let Some(ref key) = config.access_key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = config.secret_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref endpoint) = config.endpoint {
            let endpoint_url =
                if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.clone()
                } else {
                    format!("https://{}", endpoint)
                };
            builder = builder
                .with_allow_http(endpoint_url.starts_with("http://"))
                .with_endpoint(endpoint_url)
                .with_virtual_hosted_style_request(false);
        }

        let store = builder.build().context("Failed to build S3 client")?;
        info!(
            "Storage: S3 backend s3://{}/{} (region: {})",
            config.bucket, config.prefix, config.region
        );

        let mut backend = Self::new(Arc::new(store), config.prefix.clone());
        backend.supports_attributes = true;
        Ok(backend)
    }

    /// Build the backend selected in config
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackendKind::Local => Self::local(&config.local_dir, config.prefix.clone()),
            StorageBackendKind::S3 => Self::s3(config),
        }
    }

    /// Full key including the configured prefix
    pub fn full_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let full_key = self.full_key(key);
        let location = ObjectPath::parse(&full_key)
            .with_context(|| format!("Invalid object key: {}", full_key))?;

        let mut opts = PutOptions::default();
        if self.supports_attributes {
            opts.attributes =
                Attributes::from_iter([(Attribute::ContentType, content_type.to_string())]);
        }

        let size = data.len();
        self.store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
            .with_context(|| format!("Failed to upload {}", full_key))?;

        debug!(key = %full_key, size, "stored object");
        Ok(full_key)
    }
}
