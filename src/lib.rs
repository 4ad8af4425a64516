//! streamscribe - on-demand stream transcription pipeline
//!
//! An ingestion request names a source URL; the pipeline splits the stream
//! into fixed-length audio segments, transcribes each one, persists raw and
//! derived artifacts, indexes and embeds the text, and publishes a
//! rolling-window event per segment.
//!
//! # Architecture
//!
//! ```text
//! RequestPublisher → EventBus → Dispatcher → TranscriptionService → IngestJob
//!                                                 ↓
//!                          Segmenter → SegmentWatcher → ChunkProcessor
//! ```
//!
//! # Modules
//!
//! - `adapters`: Capability traits and their HTTP/object-store/subprocess adapters
//! - `bus`: Event bus capability (JetStream, in-process) and request publisher
//! - `core`: Service, dispatcher, worker pool, app orchestrator
//! - `domain`: Event payloads, segments, sliding window
//! - `ingest`: Segmenter, watcher, per-segment processor, job state machine
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the dispatcher
//! streamscribe serve
//!
//! # Request ingestion of a stream
//! streamscribe request rtmp://example/live --job-id evening-news
//!
//! # Transcribe a file locally without the request bus
//! streamscribe ingest ./broadcast.mp3
//! ```

pub mod adapters;
pub mod bus;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use crate::core::{App, Dispatcher, Ingest, TranscriptionService, WorkerPool};
pub use domain::{IngestionRequest, SegmentReadyEvent};
pub use ingest::{IngestError, JobSummary};
