//! Top-level orchestrator.
//!
//! Wires configuration into adapters, the transcription service and the
//! dispatcher, and owns shutdown ordering: dispatcher first, then the bus.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::dispatcher::{Dispatcher, DispatcherConfig};
use super::service::{ServiceConfig, TranscriptionService};
use crate::adapters::{
    ElasticsearchIndex, ObjectStoreBackend, QdrantVectorStore, TranscriptionEngine,
    WhisperCliEngine, WhisperHttpEngine,
};
use crate::bus::{EventBus, JetStreamBus};
use crate::config::{ResolvedConfig, WhisperBackendKind};
use crate::ingest::{Capabilities, Segmenter};

/// Build the concrete capabilities selected by config
pub fn build_capabilities(config: &ResolvedConfig, bus: Arc<dyn EventBus>) -> Result<Capabilities> {
    let engine: Arc<dyn TranscriptionEngine> = match config.whisper.backend {
        WhisperBackendKind::Http => Arc::new(WhisperHttpEngine::from_config(&config.whisper)?),
        WhisperBackendKind::Cli => Arc::new(WhisperCliEngine::from_config(&config.whisper)),
    };

    Ok(Capabilities {
        store: Arc::new(ObjectStoreBackend::from_config(&config.storage)?),
        engine,
        search: Arc::new(ElasticsearchIndex::from_config(&config.search)?),
        vectors: Arc::new(QdrantVectorStore::from_config(&config.vector)?),
        bus,
    })
}

/// Segmenter configured from the transcribe section
pub fn build_segmenter(config: &ResolvedConfig) -> Segmenter {
    let segmenter = Segmenter::new(
        config.transcribe.segmenter_path.clone(),
        config.transcribe.segment_seconds,
    );
    match config.transcribe.segmenter_args {
        Some(ref args) => segmenter.with_args(args.clone()),
        None => segmenter,
    }
}

/// Build the transcription service over the given capabilities
pub fn build_service(config: &ResolvedConfig, caps: Capabilities) -> TranscriptionService {
    TranscriptionService::new(caps, build_segmenter(config), ServiceConfig::from_config(config))
}

/// Check reachability of the HTTP backends, returning the unreachable ones.
///
/// Only warns; startup continues either way.
pub async fn check_backends(config: &ResolvedConfig) -> Vec<&'static str> {
    let mut unreachable = Vec::new();

    match ElasticsearchIndex::from_config(&config.search) {
        Ok(index) => {
            if let Err(e) = index.ping().await {
                warn!(url = %config.search.url, error = %e, "search index unreachable");
                unreachable.push("elasticsearch");
            }
        }
        Err(e) => {
            warn!(error = %e, "could not build search client");
            unreachable.push("elasticsearch");
        }
    }

    if config.whisper.backend == WhisperBackendKind::Http {
        match WhisperHttpEngine::from_config(&config.whisper) {
            Ok(engine) => {
                if let Err(e) = engine.health().await {
                    warn!(url = %config.whisper.url, error = %e, "whisper server unreachable");
                    unreachable.push("whisper");
                }
            }
            Err(e) => {
                warn!(error = %e, "could not build whisper client");
                unreachable.push("whisper");
            }
        }
    }

    unreachable
}

/// Running application
pub struct App {
    config: ResolvedConfig,
    bus: Arc<dyn EventBus>,
    dispatcher: Dispatcher,
}

impl App {
    /// Connect to NATS and build every component
    pub async fn connect(config: ResolvedConfig) -> Result<Self> {
        let bus: Arc<dyn EventBus> = Arc::new(JetStreamBus::connect(&config.bus).await?);
        check_backends(&config).await;
        let caps = build_capabilities(&config, bus.clone())?;
        Ok(Self::with_parts(config, bus, caps))
    }

    /// Assemble from an existing bus and capabilities
    pub fn with_parts(config: ResolvedConfig, bus: Arc<dyn EventBus>, caps: Capabilities) -> Self {
        let service = Arc::new(build_service(&config, caps));
        let dispatcher = Dispatcher::new(bus.clone(), service, DispatcherConfig::from_config(&config));
        Self {
            config,
            bus,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn start(&self) -> Result<()> {
        self.dispatcher
            .start()
            .await
            .context("Failed to start dispatcher")?;
        info!("streamscribe running");
        Ok(())
    }

    /// Stop the dispatcher, then close the bus even if draining timed out
    pub async fn stop(&self) -> Result<()> {
        let drained = self.dispatcher.stop(self.config.shutdown_timeout()).await;
        self.bus.close().await.context("Failed to close bus")?;
        drained.context("Dispatcher did not drain cleanly")?;
        info!("streamscribe stopped");
        Ok(())
    }
}
