//! Configuration for streamscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (`TRANSCRIBE_*`, `NATS_*`, `S3_*`, `WHISPER_*`, ...),
//!    after loading `.env` when present
//! 2. Config file (`--config`, `$STREAMSCRIBE_CONFIG`, `.streamscribe/config.yaml`
//!    in the current directory or a parent, then `~/.streamscribe/config.yaml`)
//! 3. Defaults
//!
//! Paths in a config file are relative to the directory containing `.streamscribe/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_WINDOW_SIZE;

/// Directory name searched for when discovering a config file
pub const CONFIG_DIR: &str = ".streamscribe";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub version: String,
    pub transcribe: TranscribeConfig,
    pub bus: BusConfig,
    pub storage: StorageConfig,
    pub whisper: WhisperConfig,
    pub search: SearchConfig,
    pub vector: VectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeConfig {
    /// Segmenter executable (ffmpeg)
    pub segmenter_path: String,
    /// Override for the segmenter argument template
    pub segmenter_args: Option<Vec<String>>,
    /// Root under which each job gets its own working directory
    pub work_dir: PathBuf,
    pub segment_seconds: u32,
    /// Maximum concurrently running jobs
    pub max_concurrent: usize,
    /// Bounded queue size for the local worker pool
    pub queue_size: usize,
    pub poll_interval_ms: u64,
    pub window_size: usize,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            segmenter_path: "ffmpeg".to_string(),
            segmenter_args: None,
            work_dir: std::env::temp_dir().join("streamscribe"),
            segment_seconds: 30,
            max_concurrent: 2,
            queue_size: 100,
            poll_interval_ms: 1000,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Stream that captures requests and segment events
    pub stream: String,
    /// Extra subjects captured by the stream
    pub subjects: Vec<String>,
    pub request_subject: String,
    pub segment_ready_subject: String,
    /// Durable consumer name used by the dispatcher
    pub consumer: String,
    pub ack_wait_secs: u64,
    pub heartbeat_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Acknowledge (instead of reject) jobs interrupted by shutdown
    pub ack_on_shutdown: bool,
    pub delete_consumer_on_stop: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            stream: "NEWS".to_string(),
            subjects: vec!["news.*".to_string()],
            request_subject: "transcribe.request".to_string(),
            segment_ready_subject: "content.segment-ready".to_string(),
            consumer: "transcribe-dispatcher".to_string(),
            ack_wait_secs: 30,
            heartbeat_secs: 10,
            shutdown_timeout_secs: 30,
            ack_on_shutdown: false,
            delete_consumer_on_stop: true,
        }
    }
}

impl BusConfig {
    /// All subjects the stream must capture, deduplicated, in declaration order
    pub fn stream_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = Vec::new();
        for subject in self
            .subjects
            .iter()
            .chain([&self.request_subject, &self.segment_ready_subject])
        {
            if !subject.is_empty() && !subjects.contains(subject) {
                subjects.push(subject.clone());
            }
        }
        subjects
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Root directory for the local backend
    pub local_dir: PathBuf,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Prefix prepended to every key
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            local_dir: std::env::temp_dir().join("streamscribe-objects"),
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: "news".to_string(),
            access_key: None,
            secret_key: None,
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperBackendKind {
    Http,
    Cli,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub backend: WhisperBackendKind,
    /// Faster-whisper HTTP server
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Local whisper binary for the cli backend
    pub cli_path: String,
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            backend: WhisperBackendKind::Http,
            url: "http://localhost:10300".to_string(),
            model: "base".to_string(),
            timeout_secs: 600,
            cli_path: "whisper".to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            api_key: None,
            username: None,
            password: None,
            index: "raw-content".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    /// OpenAI-compatible embeddings endpoint; unset disables upserts
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "raw-content".to_string(),
            embedding_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
        }
    }
}

/// Resolved configuration with environment overrides applied
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedConfig {
    pub transcribe: TranscribeConfig,
    pub bus: BusConfig,
    pub storage: StorageConfig,
    pub whisper: WhisperConfig,
    pub search: SearchConfig,
    pub vector: VectorConfig,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.transcribe.poll_interval_ms)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.bus.ack_wait_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.bus.heartbeat_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.bus.shutdown_timeout_secs)
    }

    /// Normalize soft mistakes and reject settings the pipeline cannot run with
    pub fn validate(&mut self) -> Result<()> {
        if self.transcribe.max_concurrent == 0 {
            tracing::warn!("transcribe.max_concurrent is 0, using 2");
            self.transcribe.max_concurrent = 2;
        }
        if self.transcribe.queue_size == 0 {
            tracing::warn!("transcribe.queue_size is 0, using 100");
            self.transcribe.queue_size = 100;
        }
        if self.transcribe.segment_seconds == 0 {
            anyhow::bail!("transcribe.segment_seconds must be greater than 0");
        }
        if self.transcribe.window_size == 0 {
            anyhow::bail!("transcribe.window_size must be greater than 0");
        }
        if self.transcribe.poll_interval_ms == 0 {
            anyhow::bail!("transcribe.poll_interval_ms must be greater than 0");
        }
        if self.bus.request_subject.is_empty() {
            anyhow::bail!("bus.request_subject cannot be empty");
        }
        if self.bus.heartbeat_secs == 0 || self.bus.heartbeat_secs >= self.bus.ack_wait_secs {
            anyhow::bail!(
                "bus.heartbeat_secs ({}) must be non-zero and below bus.ack_wait_secs ({})",
                self.bus.heartbeat_secs,
                self.bus.ack_wait_secs
            );
        }
        Ok(())
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        fn mask(value: &Option<String>) -> Option<String> {
            value.as_ref().map(|_| "***".to_string())
        }

        let mut copy = self.clone();
        copy.bus.password = mask(&copy.bus.password);
        copy.storage.access_key = mask(&copy.storage.access_key);
        copy.storage.secret_key = mask(&copy.storage.secret_key);
        copy.search.api_key = mask(&copy.search.api_key);
        copy.search.password = mask(&copy.search.password);
        copy.vector.api_key = mask(&copy.vector.api_key);
        copy.vector.embedding_api_key = mask(&copy.vector.embedding_api_key);
        copy
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's base directory
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Source of override values; the process environment in production
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads overrides from the process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

fn override_string(env: &dyn EnvSource, key: &str, target: &mut String) {
    if let Some(value) = env.var(key) {
        *target = value;
    }
}

fn override_option(env: &dyn EnvSource, key: &str, target: &mut Option<String>) {
    if let Some(value) = env.var(key) {
        *target = Some(value);
    }
}

fn override_parsed<T: std::str::FromStr>(env: &dyn EnvSource, key: &str, target: &mut T) -> Result<()> {
    if let Some(value) = env.var(key) {
        *target = value
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))?;
    }
    Ok(())
}

/// Apply environment overrides on top of file values
fn apply_env(config: &mut ResolvedConfig, env: &dyn EnvSource) -> Result<()> {
    let t = &mut config.transcribe;
    override_string(env, "TRANSCRIBE_FFMPEG_PATH", &mut t.segmenter_path);
    if let Some(dir) = env.var("TRANSCRIBE_TEMP_DIR") {
        t.work_dir = PathBuf::from(dir);
    }
    override_parsed(env, "TRANSCRIBE_MAX_CONCURRENT", &mut t.max_concurrent)?;
    override_parsed(env, "TRANSCRIBE_QUEUE_SIZE", &mut t.queue_size)?;
    override_parsed(env, "TRANSCRIBE_SEGMENT_SECONDS", &mut t.segment_seconds)?;

    let b = &mut config.bus;
    override_string(env, "NATS_URL", &mut b.url);
    override_option(env, "NATS_USER", &mut b.user);
    override_option(env, "NATS_PASSWORD", &mut b.password);
    override_string(env, "JS_EVENTS_STREAM", &mut b.stream);
    if let Some(subjects) = env.var("JS_EVENTS_SUBJECTS") {
        b.subjects = subjects
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    let s = &mut config.storage;
    if let Some(endpoint) = env.var("S3_ENDPOINT") {
        s.endpoint = Some(endpoint);
        s.backend = StorageBackendKind::S3;
    }
    override_string(env, "S3_REGION", &mut s.region);
    override_string(env, "S3_BUCKET", &mut s.bucket);
    override_option(env, "S3_ACCESS_KEY", &mut s.access_key);
    override_option(env, "S3_SECRET_KEY", &mut s.secret_key);

    let w = &mut config.whisper;
    override_string(env, "WHISPER_URL", &mut w.url);
    override_string(env, "WHISPER_MODEL", &mut w.model);
    override_parsed(env, "WHISPER_TIMEOUT_SECONDS", &mut w.timeout_secs)?;

    let e = &mut config.search;
    override_string(env, "ELASTICSEARCH_URL", &mut e.url);
    override_option(env, "ELASTICSEARCH_API_KEY", &mut e.api_key);
    override_option(env, "ELASTICSEARCH_USERNAME", &mut e.username);
    override_option(env, "ELASTICSEARCH_PASSWORD", &mut e.password);

    let v = &mut config.vector;
    override_string(env, "QDRANT_URL", &mut v.url);
    override_option(env, "QDRANT_API_KEY", &mut v.api_key);
    override_string(env, "QDRANT_COLLECTION", &mut v.collection);
    override_option(env, "OPENAI_API_KEY", &mut v.embedding_api_key);
    override_option(env, "EMBEDDING_URL", &mut v.embedding_url);

    Ok(())
}

/// Build a resolved config from an optional file plus environment overrides
fn resolve(config_file: Option<PathBuf>, env: &dyn EnvSource) -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some(ref config_path) = config_file {
        let file = load_config_file(config_path)?;

        // Base directory is the parent of .streamscribe/ (or the file's own dir)
        let parent = config_path.parent().unwrap_or(Path::new("."));
        let base_dir = if parent.file_name().is_some_and(|n| n == CONFIG_DIR) {
            parent.parent().unwrap_or(Path::new("."))
        } else {
            parent
        };

        resolved.transcribe = file.transcribe;
        resolved.transcribe.work_dir = resolve_path(base_dir, &resolved.transcribe.work_dir);
        resolved.bus = file.bus;
        resolved.storage = file.storage;
        resolved.storage.local_dir = resolve_path(base_dir, &resolved.storage.local_dir);
        resolved.whisper = file.whisper;
        resolved.search = file.search;
        resolved.vector = file.vector;
    }
    resolved.config_file = config_file;

    apply_env(&mut resolved, env)?;
    resolved.validate()?;
    Ok(resolved)
}

/// Load configuration from all sources.
///
/// An explicit path wins over `$STREAMSCRIBE_CONFIG` and discovery.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    // A missing .env is the normal case
    let _ = dotenvy::dotenv();

    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => match std::env::var("STREAMSCRIBE_CONFIG") {
            Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => find_config_file(),
        },
    };

    resolve(config_file, &ProcessEnv)
}
