//! Domain types for stream ingestion.
//!
//! This module contains the core data structures:
//! - Events: bus payloads (ingestion requests, segment-ready summaries)
//! - Segment: segment files and their index naming scheme
//! - Window: the rolling transcript window

pub mod events;
pub mod segment;
pub mod window;

// Re-export commonly used types
pub use events::{
    generate_job_id, validate_job_id, IngestionRequest, MalformedEvent, SegmentReadyEvent,
    INGESTION_REQUESTED, SEGMENT_READY,
};
pub use segment::{parse_index, segment_file_name, Segment, SegmentNameError};
pub use window::{SlidingWindow, DEFAULT_WINDOW_SIZE};
