//! NATS JetStream event bus.
//!
//! Deliveries map onto JetStream acknowledgements:
//! ack → `+ACK`, reject → `-NAK`, extend lease → `+WPI` (in progress).

use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    stream, AckKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{merge_subjects, ConsumerConfig, Delivery, EventBus, Subscription};
use crate::config::BusConfig;

/// JetStream-backed bus
pub struct JetStreamBus {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl JetStreamBus {
    /// Connect using the bus section of the config
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        let mut options = async_nats::ConnectOptions::new()
            .name("streamscribe")
            .max_reconnects(10);

        if let Some(ref user) = config.user {
            options = options.user_and_password(
                user.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;

        info!(url = %config.url, "connected to NATS");
        let context = jetstream::new(client.clone());
        Ok(Self { client, context })
    }
}

#[async_trait]
impl EventBus for JetStreamBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.context
            .publish(subject.to_string(), payload)
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?
            .await
            .with_context(|| format!("No publish ack for {}", subject))?;
        Ok(())
    }

    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<()> {
        let mut stream = self
            .context
            .get_or_create_stream(stream::Config {
                name: name.to_string(),
                subjects: subjects.to_vec(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("Failed to ensure stream {}", name))?;

        // An existing stream keeps its config; add whatever subjects it lacks
        let current = stream
            .info()
            .await
            .with_context(|| format!("Failed to read stream {}", name))?
            .config
            .clone();

        if let Some(merged) = merge_subjects(&current.subjects, subjects) {
            info!(stream = name, ?merged, "adding subjects to existing stream");
            self.context
                .update_stream(stream::Config {
                    subjects: merged,
                    ..current
                })
                .await
                .with_context(|| format!("Failed to update stream {}", name))?;
        }

        debug!(stream = name, ?subjects, "stream ready");
        Ok(())
    }

    async fn create_consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn Subscription>> {
        let stream = self
            .context
            .get_stream(&config.stream)
            .await
            .with_context(|| format!("Stream {} not found", config.stream))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: config.ack_wait,
                    max_ack_pending: config.max_ack_pending as i64,
                    filter_subject: config.filter_subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to create consumer {}", config.durable_name))?;

        let messages = consumer
            .messages()
            .await
            .with_context(|| format!("Failed to pull from consumer {}", config.durable_name))?;

        info!(
            stream = %config.stream,
            consumer = %config.durable_name,
            subject = %config.filter_subject,
            "consumer ready"
        );
        Ok(Box::new(JetStreamSubscription { messages }))
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<()> {
        let stream_handle = self
            .context
            .get_stream(stream)
            .await
            .with_context(|| format!("Stream {} not found", stream))?;

        stream_handle
            .delete_consumer(name)
            .await
            .with_context(|| format!("Failed to delete consumer {}", name))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "NATS flush failed on close");
        }
        Ok(())
    }
}

struct JetStreamSubscription {
    messages: pull::Stream,
}

#[async_trait]
impl Subscription for JetStreamSubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        let item = self.messages.next().await?;
        Some(
            item.map(|message| Box::new(JetStreamDelivery { message }) as Box<dyn Delivery>)
                .map_err(|e| anyhow!("JetStream delivery failed: {}", e)),
        )
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("ack failed: {}", e))
    }

    async fn reject(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("nak failed: {}", e))
    }

    async fn extend_lease(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| anyhow!("in-progress ack failed: {}", e))
    }
}
