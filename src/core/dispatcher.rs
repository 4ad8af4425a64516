//! Event dispatcher: bus-driven job execution with bounded concurrency.
//!
//! Per message:
//! 1. Decode; malformed payloads are rejected and reading continues
//! 2. Wait for a free concurrency slot (this stalls the read loop)
//! 3. Run the job in its own task, extending the message lease on a ticker
//! 4. Ack on success, reject on failure; jobs interrupted by shutdown follow
//!    the configured shutdown policy
//! 5. Release the slot

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::service::Ingest;
use crate::bus::{ConsumerConfig, Delivery, EventBus, Subscription};
use crate::config::ResolvedConfig;
use crate::domain::{generate_job_id, IngestionRequest};

/// Pause after a failed receive before pulling again
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Heartbeat used when the configured one is zero
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is not running")]
    NotStarted,

    #[error("dispatcher was already started")]
    AlreadyStarted,

    #[error("bus error: {0}")]
    Bus(#[from] anyhow::Error),

    #[error("in-flight jobs still running after {0:?}")]
    DrainTimeout(Duration),
}

/// Lifecycle of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Stopped,
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Stream holding the request subject
    pub stream: String,

    /// Subjects the stream must capture
    pub stream_subjects: Vec<String>,

    pub request_subject: String,

    /// Durable consumer name
    pub consumer: String,

    /// Maximum concurrently running jobs
    pub max_concurrent: usize,

    /// Bus redelivery timeout
    pub ack_wait: Duration,

    /// Lease extension interval; must stay well below `ack_wait`
    pub heartbeat: Duration,

    /// Acknowledge jobs interrupted by shutdown instead of rejecting them
    pub ack_on_shutdown: bool,

    pub delete_consumer_on_stop: bool,
}

impl DispatcherConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            stream: config.bus.stream.clone(),
            stream_subjects: config.bus.stream_subjects(),
            request_subject: config.bus.request_subject.clone(),
            consumer: config.bus.consumer.clone(),
            max_concurrent: config.transcribe.max_concurrent,
            ack_wait: config.ack_wait(),
            heartbeat: config.heartbeat(),
            ack_on_shutdown: config.bus.ack_on_shutdown,
            delete_consumer_on_stop: config.bus.delete_consumer_on_stop,
        }
    }
}

/// Pulls ingestion requests and runs them with bounded concurrency
pub struct Dispatcher {
    bus: Arc<dyn EventBus>,
    ingestor: Arc<dyn Ingest>,
    config: DispatcherConfig,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<DispatcherState>,
}

/// Everything a handler task needs, cloned out of the dispatcher
#[derive(Clone)]
struct HandlerContext {
    ingestor: Arc<dyn Ingest>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    heartbeat: Duration,
    ack_on_shutdown: bool,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn EventBus>, ingestor: Arc<dyn Ingest>, config: DispatcherConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let heartbeat = if config.heartbeat.is_zero() {
            warn!(default = ?DEFAULT_HEARTBEAT, "heartbeat is zero, using default");
            DEFAULT_HEARTBEAT
        } else {
            config.heartbeat
        };
        Self {
            bus,
            ingestor,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            config: DispatcherConfig {
                max_concurrent,
                heartbeat,
                ..config
            },
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: Mutex::new(DispatcherState::Idle),
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: DispatcherState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    /// Number of busy concurrency slots
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent - self.slots.available_permits()
    }

    /// Ensure the stream and consumer exist, then start reading
    pub async fn start(&self) -> Result<(), DispatchError> {
        if self.state() != DispatcherState::Idle {
            return Err(DispatchError::AlreadyStarted);
        }

        self.bus
            .ensure_stream(&self.config.stream, &self.config.stream_subjects)
            .await?;

        let subscription = self
            .bus
            .create_consumer(&ConsumerConfig {
                stream: self.config.stream.clone(),
                durable_name: self.config.consumer.clone(),
                filter_subject: self.config.request_subject.clone(),
                ack_wait: self.config.ack_wait,
                max_ack_pending: self.config.max_concurrent,
            })
            .await?;

        let ctx = HandlerContext {
            ingestor: self.ingestor.clone(),
            slots: self.slots.clone(),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            heartbeat: self.config.heartbeat,
            ack_on_shutdown: self.config.ack_on_shutdown,
        };
        self.tracker.spawn(read_loop(ctx, subscription));
        self.set_state(DispatcherState::Running);

        info!(
            consumer = %self.config.consumer,
            subject = %self.config.request_subject,
            max_concurrent = self.config.max_concurrent,
            "dispatcher started"
        );
        Ok(())
    }

    /// Cancel in-flight jobs, wait for handlers to settle, and deregister.
    ///
    /// Returns [`DispatchError::DrainTimeout`] if handlers are still running
    /// after `timeout`.
    pub async fn stop(&self, timeout: Duration) -> Result<(), DispatchError> {
        match self.state() {
            DispatcherState::Idle => return Err(DispatchError::NotStarted),
            DispatcherState::Stopped => return Ok(()),
            DispatcherState::Running => {}
        }

        info!(in_flight = self.in_flight(), "stopping dispatcher");
        self.shutdown.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();

        if self.config.delete_consumer_on_stop {
            if let Err(e) = self
                .bus
                .delete_consumer(&self.config.stream, &self.config.consumer)
                .await
            {
                warn!(consumer = %self.config.consumer, error = %e, "failed to delete consumer");
            }
        }
        self.set_state(DispatcherState::Stopped);

        if drained {
            info!("dispatcher stopped");
            Ok(())
        } else {
            error!(in_flight = self.in_flight(), "dispatcher drain timed out");
            Err(DispatchError::DrainTimeout(timeout))
        }
    }
}

async fn reject(delivery: &dyn Delivery) {
    if let Err(e) = delivery.reject().await {
        warn!(subject = delivery.subject(), error = %e, "reject failed");
    }
}

async fn read_loop(ctx: HandlerContext, mut subscription: Box<dyn Subscription>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            next = subscription.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                warn!(error = %e, "receive failed");
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                }
            }
            None => {
                info!("subscription ended");
                break;
            }
        };

        let mut request = match IngestionRequest::from_payload(delivery.payload()) {
            Ok(request) => request,
            Err(e) => {
                warn!(subject = delivery.subject(), error = %e, "malformed request, rejecting");
                reject(delivery.as_ref()).await;
                continue;
            }
        };

        // Blocks the loop while every slot is busy
        let permit = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                reject(delivery.as_ref()).await;
                break;
            }
            permit = ctx.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    reject(delivery.as_ref()).await;
                    break;
                }
            },
        };

        // Resolve the id here so every log line of the job carries it
        if request.job_id.is_empty() {
            request.job_id = generate_job_id();
        }
        debug!(job_id = %request.job_id, source_url = %request.url, "dispatching");
        ctx.tracker
            .spawn(handle(ctx.clone(), delivery, request, permit));
    }
    debug!("read loop exited");
}

async fn handle(
    ctx: HandlerContext,
    delivery: Box<dyn Delivery>,
    request: IngestionRequest,
    permit: OwnedSemaphorePermit,
) {
    let job_cancel = ctx.shutdown.child_token();
    let job = ctx
        .ingestor
        .ingest_url(&request.url, &request.job_id, job_cancel);
    tokio::pin!(job);

    let mut heartbeat = interval_at(Instant::now() + ctx.heartbeat, ctx.heartbeat);
    let result = loop {
        tokio::select! {
            result = &mut job => break result,
            _ = heartbeat.tick() => {
                if let Err(e) = delivery.extend_lease().await {
                    warn!(job_id = %request.job_id, error = %e, "lease extension failed");
                }
            }
        }
    };

    let ack = match &result {
        Ok(summary) => {
            info!(
                job_id = %summary.job_id,
                source_url = %request.url,
                processed = summary.processed,
                failed = summary.failed,
                "job finished"
            );
            true
        }
        Err(e) if e.is_cancelled() => {
            info!(
                job_id = %request.job_id,
                source_url = %request.url,
                ack = ctx.ack_on_shutdown,
                "job cancelled by shutdown"
            );
            ctx.ack_on_shutdown
        }
        Err(e) => {
            warn!(job_id = %request.job_id, source_url = %request.url, error = %e, "job failed");
            false
        }
    };

    let outcome = if ack {
        delivery.ack().await
    } else {
        delivery.reject().await
    };
    if let Err(e) = outcome {
        warn!(job_id = %request.job_id, error = %e, "failed to settle message");
    }

    // Slot is released only after the message is settled
    drop(permit);
}
