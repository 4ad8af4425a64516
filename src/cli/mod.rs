//! Command-line interface for streamscribe.
//!
//! Provides commands for running the bus-driven service, publishing
//! ingestion requests, running jobs locally, and inspecting configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::bus::{EventBus, JetStreamBus, MemoryBus, RequestPublisher};
use crate::config::{load_config, ResolvedConfig};
use crate::core::{build_capabilities, build_service, App, WorkerPool};

/// streamscribe - on-demand stream transcription pipeline
#[derive(Parser, Debug)]
#[command(name = "streamscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (overrides $STREAMSCRIBE_CONFIG and discovery)
    #[arg(short, long, global = true, env = "STREAMSCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume ingestion requests from the bus until Ctrl-C
    Serve,

    /// Publish an ingestion request
    Request {
        /// Source stream URL
        url: String,

        /// Job id (generated if not provided)
        #[arg(short, long, default_value = "")]
        job_id: String,
    },

    /// Ingest URLs locally through the worker pool, without the request bus
    Ingest {
        /// Source stream URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Job id (only valid with a single URL)
        #[arg(short, long, default_value = "")]
        job_id: String,

        /// Publish segment events to NATS instead of discarding them
        #[arg(long)]
        publish: bool,
    },

    /// Show resolved configuration (secrets redacted)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Serve => serve(config).await,
            Commands::Request { url, job_id } => request(config, &url, &job_id).await,
            Commands::Ingest {
                urls,
                job_id,
                publish,
            } => ingest(config, urls, &job_id, publish).await,
            Commands::Config => show_config(&config),
        }
    }
}

async fn serve(config: ResolvedConfig) -> Result<()> {
    let app = App::connect(config).await?;
    app.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    app.stop().await
}

async fn request(config: ResolvedConfig, url: &str, job_id: &str) -> Result<()> {
    let bus = JetStreamBus::connect(&config.bus).await?;
    bus.ensure_stream(&config.bus.stream, &config.bus.stream_subjects())
        .await?;

    let bus: Arc<dyn EventBus> = Arc::new(bus);
    let publisher = RequestPublisher::new(bus.clone(), config.bus.request_subject.clone());
    let job_id = publisher.publish_request(url, job_id).await?;
    bus.close().await?;

    println!("{}", job_id);
    Ok(())
}

async fn ingest(config: ResolvedConfig, urls: Vec<String>, job_id: &str, publish: bool) -> Result<()> {
    if !job_id.is_empty() && urls.len() > 1 {
        anyhow::bail!("--job-id can only be used with a single URL");
    }

    let bus: Arc<dyn EventBus> = if publish {
        let bus = JetStreamBus::connect(&config.bus).await?;
        bus.ensure_stream(&config.bus.stream, &config.bus.stream_subjects())
            .await?;
        Arc::new(bus)
    } else {
        Arc::new(MemoryBus::new())
    };

    let caps = build_capabilities(&config, bus.clone())?;
    let service = Arc::new(build_service(&config, caps));
    let (pool, mut outcomes) = WorkerPool::start(
        service,
        config.transcribe.max_concurrent,
        config.transcribe.queue_size,
    );

    for url in &urls {
        let id = pool.submit(url, job_id)?;
        eprintln!("[queued {} for {}]", id, url);
    }
    pool.close();

    let mut failures = 0;
    loop {
        tokio::select! {
            outcome = outcomes.recv() => {
                let Some(outcome) = outcome else { break };
                match outcome.result {
                    Ok(summary) => eprintln!(
                        "[{} done: {} processed, {} succeeded, {} failed]",
                        summary.job_id, summary.processed, summary.succeeded, summary.failed
                    ),
                    Err(e) => {
                        failures += 1;
                        eprintln!("[{} failed: {}]", outcome.job_id, e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling jobs");
                if let Err(e) = pool.stop(config.shutdown_timeout()).await {
                    warn!(error = %e, "workers did not stop in time");
                }
            }
        }
    }

    bus.close().await?;
    if failures > 0 {
        anyhow::bail!("{} of {} jobs failed", failures, urls.len());
    }
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();

    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to render config")?;
    print!("{}", yaml);
    Ok(())
}
