//! Core orchestration logic.
//!
//! This module contains:
//! - Service: runs one ingest job to completion
//! - Dispatcher: bus-driven job execution with bounded concurrency
//! - Pool: bounded in-memory queue alternative (non-durable)
//! - App: top-level wiring and shutdown ordering

pub mod app;
pub mod dispatcher;
pub mod pool;
pub mod service;

// Re-export commonly used types
pub use app::{build_capabilities, build_segmenter, build_service, check_backends, App};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, DispatcherState};
pub use pool::{JobOutcome, WorkerPool};
pub use service::{Ingest, ServiceConfig, TranscriptionService};
