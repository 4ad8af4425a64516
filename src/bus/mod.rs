//! Event bus capability.
//!
//! Durable publish/subscribe with per-message explicit acknowledgement:
//! - EventBus: publishing plus stream and consumer management
//! - Subscription: pull-style stream of deliveries for one consumer
//! - Delivery: one message awaiting ack, reject, or lease extension
//!
//! Implementations:
//! - `nats`: NATS JetStream
//! - `memory`: in-process bus for local runs and tests
//! - `publisher`: emits ingestion requests onto any bus

pub mod memory;
pub mod nats;
pub mod publisher;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

// Re-export commonly used types
pub use memory::{DeliveryOutcome, MemoryBus};
pub use nats::JetStreamBus;
pub use publisher::{PublishError, RequestPublisher};

/// Durable consumer registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Stream the consumer reads from
    pub stream: String,

    /// Durable name shared by every dispatcher replica
    pub durable_name: String,

    /// Only messages on this subject are delivered
    pub filter_subject: String,

    /// Redelivery timeout for unacknowledged messages
    pub ack_wait: Duration,

    /// Upper bound on delivered-but-unacknowledged messages
    pub max_ack_pending: usize,
}

/// Subjects a stream must capture after adding `required` to `existing`.
///
/// Returns `None` when nothing is missing; otherwise the existing subjects
/// in their order followed by the missing ones.
pub fn merge_subjects(existing: &[String], required: &[String]) -> Option<Vec<String>> {
    let mut merged = existing.to_vec();
    for subject in required {
        if !subject.is_empty() && !merged.contains(subject) {
            merged.push(subject.clone());
        }
    }
    (merged.len() != existing.len()).then_some(merged)
}

/// One delivered message
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body
    fn payload(&self) -> &[u8];

    /// Subject the message was published on
    fn subject(&self) -> &str;

    /// Mark processed; the bus will not redeliver it
    async fn ack(&self) -> Result<()>;

    /// Negative-acknowledge; the bus redelivers per its own policy
    async fn reject(&self) -> Result<()>;

    /// Reset the redelivery timer for a message still being worked
    async fn extend_lease(&self) -> Result<()>;
}

/// Pull-style stream of deliveries for one consumer
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `None` once the subscription has ended
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>>;
}

/// Durable event bus
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish and wait for the bus to persist the message
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Create the stream or update its subjects; idempotent
    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<()>;

    /// Create or reuse a durable consumer and start pulling from it
    async fn create_consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn Subscription>>;

    /// Remove a consumer registration
    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<()>;

    /// Flush pending publishes and close the connection
    async fn close(&self) -> Result<()>;
}
