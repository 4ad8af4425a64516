//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use streamscribe::adapters::{ObjectStore, SearchIndex, TranscriptionEngine, VectorStore};
use streamscribe::bus::{EventBus, MemoryBus};
use streamscribe::core::{DispatcherConfig, Ingest};
use streamscribe::domain::SegmentReadyEvent;
use streamscribe::ingest::{
    Capabilities, IngestError, JobSummary, ProcessorSettings, Segmenter,
};

pub const SEGMENT_SUBJECT: &str = "content.segment-ready";
pub const REQUEST_SUBJECT: &str = "transcribe.request";

/// Object store keeping everything in memory; keys containing a configured
/// substring fail
#[derive(Default)]
pub struct FakeStore {
    pub objects: Mutex<Vec<(String, Bytes)>>,
    pub fail_keys: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub fn fail_on(&self, key_part: &str) {
        self.fail_keys.lock().unwrap().insert(key_part.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<String> {
        let fail = self
            .fail_keys
            .lock()
            .unwrap()
            .iter()
            .any(|part| key.contains(part.as_str()));
        if fail {
            anyhow::bail!("injected upload failure for {}", key);
        }
        self.objects.lock().unwrap().push((key.to_string(), data));
        Ok(key.to_string())
    }
}

/// "Transcribes" by returning the file contents as text
#[derive(Default)]
pub struct FakeEngine {
    pub calls: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
    pub fail_names: Mutex<HashSet<String>>,
    pub fail_all: AtomicBool,
}

impl FakeEngine {
    pub fn with_delay(delay: Duration) -> Self {
        let engine = Self::default();
        *engine.delay.lock().unwrap() = Some(delay);
        engine
    }

    pub fn fail_on(&self, file_name: &str) {
        self.fail_names.lock().unwrap().insert(file_name.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if self.fail_all.load(Ordering::SeqCst) || self.fail_names.lock().unwrap().contains(&name) {
            anyhow::bail!("injected transcription failure for {}", name);
        }
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

#[derive(Default)]
pub struct FakeIndex {
    pub documents: Mutex<Vec<(String, String, serde_json::Value)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl SearchIndex for FakeIndex {
    async fn index_document(&self, index: &str, doc_id: &str, document: serde_json::Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected index failure");
        }
        self.documents
            .lock()
            .unwrap()
            .push((index.to_string(), doc_id.to_string(), document));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVectors {
    pub points: Mutex<Vec<(String, String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl VectorStore for FakeVectors {
    async fn upsert_text(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        _payload: serde_json::Value,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected vector failure");
        }
        self.points
            .lock()
            .unwrap()
            .push((collection.to_string(), id.to_string(), text.to_string()));
        Ok(())
    }
}

/// All fakes plus the capabilities wired to them
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub engine: Arc<FakeEngine>,
    pub index: Arc<FakeIndex>,
    pub vectors: Arc<FakeVectors>,
    pub bus: MemoryBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(FakeEngine::default())
    }

    pub fn with_engine(engine: FakeEngine) -> Self {
        Self {
            store: Arc::new(FakeStore::default()),
            engine: Arc::new(engine),
            index: Arc::new(FakeIndex::default()),
            vectors: Arc::new(FakeVectors::default()),
            bus: MemoryBus::new(),
        }
    }

    pub fn caps(&self) -> Capabilities {
        Capabilities {
            store: self.store.clone(),
            engine: self.engine.clone(),
            search: self.index.clone(),
            vectors: self.vectors.clone(),
            bus: Arc::new(self.bus.clone()) as Arc<dyn EventBus>,
        }
    }

    /// Segment events published so far
    pub fn events(&self) -> Vec<SegmentReadyEvent> {
        self.bus
            .published(SEGMENT_SUBJECT)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }
}

pub fn settings() -> ProcessorSettings {
    ProcessorSettings {
        segment_seconds: 30,
        window_size: 7,
        search_index: "raw-content".to_string(),
        vector_collection: "raw-content".to_string(),
        segment_ready_subject: SEGMENT_SUBJECT.to_string(),
    }
}

/// Segmenter running a shell script; `{dir}` expands to the working directory
pub fn script_segmenter(script: &str) -> Segmenter {
    Segmenter::new("sh", 30).with_args(vec!["-c".to_string(), script.to_string()])
}

/// Script writing `texts[i]` into `segment_{i:05}.wav`, then running `tail`
pub fn segments_script(texts: &[&str], tail: &str) -> String {
    let mut script = String::new();
    for (i, text) in texts.iter().enumerate() {
        script.push_str(&format!("printf '{}' > {{dir}}/segment_{:05}.wav; ", text, i));
    }
    script.push_str(tail);
    script
}

/// Write a segment file directly
pub fn write_segment(dir: &Path, index: u64, text: &str) -> PathBuf {
    let path = dir.join(format!("segment_{:05}.wav", index));
    std::fs::write(&path, text).unwrap();
    path
}

pub fn dispatcher_config(max_concurrent: usize) -> DispatcherConfig {
    DispatcherConfig {
        stream: "INGEST".to_string(),
        stream_subjects: vec![REQUEST_SUBJECT.to_string(), SEGMENT_SUBJECT.to_string()],
        request_subject: REQUEST_SUBJECT.to_string(),
        consumer: "transcribe-dispatcher".to_string(),
        max_concurrent,
        ack_wait: Duration::from_secs(30),
        heartbeat: Duration::from_secs(10),
        ack_on_shutdown: false,
        delete_consumer_on_stop: true,
    }
}

/// Scripted ingestor keyed on the URL:
/// - `ok://...` finishes after `work`
/// - `fail://...` fails after `work`
/// - `hang://...` runs until cancelled
/// - `stubborn://...` ignores cancellation for `work`
#[derive(Default)]
pub struct FakeIngestor {
    pub work: Duration,
    pub calls: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub job_ids: Mutex<Vec<String>>,
}

impl FakeIngestor {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Job ids the ingestor was called with, in call order
    pub fn job_ids(&self) -> Vec<String> {
        self.job_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ingest for FakeIngestor {
    async fn ingest_url(
        &self,
        url: &str,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobSummary, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.job_ids.lock().unwrap().push(job_id.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let summary = JobSummary {
            job_id: job_id.to_string(),
            ..Default::default()
        };
        let result = if url.starts_with("hang://") {
            cancel.cancelled().await;
            Err(IngestError::Cancelled)
        } else if url.starts_with("stubborn://") {
            tokio::time::sleep(self.work).await;
            Ok(summary)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(IngestError::Cancelled),
                _ = tokio::time::sleep(self.work) => {
                    if url.starts_with("fail://") {
                        Err(IngestError::SegmenterFailed("exit status: 1".to_string()))
                    } else {
                        Ok(summary)
                    }
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Poll `check` every 10ms until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Serve every connection a bodiless response with `status`; returns the base url
pub async fn serve_status(status: u16) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Url of a local port nothing listens on
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
