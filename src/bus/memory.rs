//! In-process event bus.
//!
//! Same contract as the JetStream bus, without durability. Every delivery
//! outcome and every published payload is recorded so callers can inspect
//! what happened. Rejected messages are redelivered at most once when
//! redelivery is enabled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{merge_subjects, ConsumerConfig, Delivery, EventBus, Subscription};

/// What happened to a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected,
    LeaseExtended,
}

#[derive(Debug, Clone)]
struct MemoryMessage {
    id: u64,
    subject: String,
    payload: Bytes,
    attempt: u32,
}

struct Consumer {
    filter_subject: String,
    sender: mpsc::UnboundedSender<MemoryMessage>,
}

#[derive(Default)]
struct State {
    /// Every published message, in publish order
    log: Vec<MemoryMessage>,
    streams: HashMap<String, Vec<String>>,
    consumers: HashMap<String, Consumer>,
    deleted_consumers: Vec<String>,
    /// Outcomes in the order they were recorded
    history: Vec<(u64, DeliveryOutcome)>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    next_id: AtomicU64,
    redeliver_on_reject: bool,
    fail_publish: AtomicBool,
    fail_extend: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, id: u64, outcome: DeliveryOutcome) {
        self.lock().history.push((id, outcome));
    }
}

/// In-process bus
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subject matching with NATS-style `*` (one token) and `>` (rest) wildcards
fn subject_matches(filter: &str, subject: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl MemoryBus {
    /// Bus without redelivery
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Bus that redelivers each rejected message once
    pub fn with_redelivery() -> Self {
        Self::build(true)
    }

    fn build(redeliver_on_reject: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
                redeliver_on_reject,
                fail_publish: AtomicBool::new(false),
                fail_extend: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent publish fail until turned off
    pub fn set_fail_publish(&self, fail: bool) {
        self.shared.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent lease extension fail until turned off
    pub fn set_fail_extend(&self, fail: bool) {
        self.shared.fail_extend.store(fail, Ordering::SeqCst);
    }

    /// Payloads published on `subject`, in order
    pub fn published(&self, subject: &str) -> Vec<Bytes> {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|m| m.subject == subject)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// All recorded outcomes, in order
    pub fn history(&self) -> Vec<(u64, DeliveryOutcome)> {
        self.shared.lock().history.clone()
    }

    /// Outcomes recorded for one message
    pub fn outcomes(&self, id: u64) -> Vec<DeliveryOutcome> {
        self.shared
            .lock()
            .history
            .iter()
            .filter(|(m, _)| *m == id)
            .map(|(_, o)| *o)
            .collect()
    }

    /// Number of recorded outcomes of a kind
    pub fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.shared
            .lock()
            .history
            .iter()
            .filter(|(_, o)| *o == outcome)
            .count()
    }

    /// Names of consumers removed via `delete_consumer`
    pub fn deleted_consumers(&self) -> Vec<String> {
        self.shared.lock().deleted_consumers.clone()
    }

    /// Subjects registered for a stream
    pub fn stream_subjects(&self, name: &str) -> Option<Vec<String>> {
        self.shared.lock().streams.get(name).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Poll until `count` acks plus rejects have been recorded or `timeout` elapses
    pub async fn wait_for_settled(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let settled = self.count(DeliveryOutcome::Acked) + self.count(DeliveryOutcome::Rejected);
            if settled >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        if self.shared.fail_publish.load(Ordering::SeqCst) {
            anyhow::bail!("publish to {} refused", subject);
        }

        let message = MemoryMessage {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            subject: subject.to_string(),
            payload,
            attempt: 1,
        };

        let mut state = self.shared.lock();
        if state.closed {
            anyhow::bail!("bus is closed");
        }
        for consumer in state.consumers.values() {
            if subject_matches(&consumer.filter_subject, subject) {
                // A dropped subscription just misses the message
                let _ = consumer.sender.send(message.clone());
            }
        }
        state.log.push(message);
        Ok(())
    }

    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<()> {
        let mut state = self.shared.lock();
        let existing = state.streams.entry(name.to_string()).or_default();
        if let Some(merged) = merge_subjects(existing, subjects) {
            *existing = merged;
        }
        Ok(())
    }

    async fn create_consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn Subscription>> {
        let mut state = self.shared.lock();
        if !state.streams.contains_key(&config.stream) {
            anyhow::bail!("stream {} not found", config.stream);
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        // Replay anything on the subject that was never acknowledged
        for message in state.log.iter() {
            let acked = state
                .history
                .iter()
                .any(|(id, o)| *id == message.id && *o == DeliveryOutcome::Acked);
            if !acked && subject_matches(&config.filter_subject, &message.subject) {
                let _ = sender.send(message.clone());
            }
        }

        state.consumers.insert(
            config.durable_name.clone(),
            Consumer {
                filter_subject: config.filter_subject.clone(),
                sender: sender.clone(),
            },
        );

        Ok(Box::new(MemorySubscription {
            receiver,
            sender,
            shared: self.shared.clone(),
        }))
    }

    async fn delete_consumer(&self, _stream: &str, name: &str) -> Result<()> {
        let mut state = self.shared.lock();
        if state.consumers.remove(name).is_none() {
            anyhow::bail!("consumer {} not found", name);
        }
        state.deleted_consumers.push(name.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.shared.lock();
        state.consumers.clear();
        state.closed = true;
        Ok(())
    }
}

struct MemorySubscription {
    receiver: mpsc::UnboundedReceiver<MemoryMessage>,
    /// Used for redelivery after a reject
    sender: mpsc::UnboundedSender<MemoryMessage>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        let message = self.receiver.recv().await?;
        Some(Ok(Box::new(MemoryDelivery {
            message,
            redeliver: self.sender.clone(),
            shared: self.shared.clone(),
        })))
    }
}

struct MemoryDelivery {
    message: MemoryMessage,
    redeliver: mpsc::UnboundedSender<MemoryMessage>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn subject(&self) -> &str {
        &self.message.subject
    }

    async fn ack(&self) -> Result<()> {
        self.shared.record(self.message.id, DeliveryOutcome::Acked);
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.shared.record(self.message.id, DeliveryOutcome::Rejected);
        if self.shared.redeliver_on_reject && self.message.attempt == 1 {
            let mut retry = self.message.clone();
            retry.attempt += 1;
            let _ = self.redeliver.send(retry);
        }
        Ok(())
    }

    async fn extend_lease(&self) -> Result<()> {
        if self.shared.fail_extend.load(Ordering::SeqCst) {
            anyhow::bail!("lease extension for message {} refused", self.message.id);
        }
        self.shared
            .record(self.message.id, DeliveryOutcome::LeaseExtended);
        Ok(())
    }
}
