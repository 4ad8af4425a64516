//! Stream ingestion pipeline.
//!
//! One job per source URL:
//!
//! 1. **Segmenter**: subprocess writing fixed-length audio segments
//! 2. **Watcher**: polls the working directory for completed segments
//! 3. **Processor**: upload → transcribe → persist → index → embed → publish
//!
//! # Architecture
//!
//! ```text
//! source URL → Segmenter → workdir/segment_NNNNN.wav → Watcher → Processor
//!                                                                 ↓
//!                                     object store, search, vectors, bus
//! ```

pub mod error;
pub mod job;
pub mod processor;
pub mod segmenter;
pub mod watcher;

// Re-export key types
pub use error::{IngestError, Stage, StageError};
pub use job::{IngestJob, JobState, JobSummary};
pub use processor::{Capabilities, ChunkProcessor, ProcessorSettings};
pub use segmenter::{Segmenter, SegmenterExit, SegmenterProcess};
pub use watcher::SegmentWatcher;
