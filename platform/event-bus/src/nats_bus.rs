//! NATS JetStream implementation of the EventBus trait

use crate::{Acknowledger, BusError, BusMessage, BusResult, Delivery, EventBus};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    context::PublishErrorKind,
    stream, AckKind,
};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Stream and consumer settings for [`NatsBus`]
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    /// JetStream stream that stores the published subjects
    pub stream_name: String,
    /// Subjects captured by the stream (e.g. `quiz.events.>`)
    pub subjects: Vec<String>,
    /// How long the server waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Maximum deliveries per message; -1 means unlimited
    pub max_deliver: i64,
    /// Window in which a repeated `Nats-Msg-Id` is discarded by the server
    pub duplicate_window: Duration,
}

impl Default for NatsBusConfig {
    fn default() -> Self {
        Self {
            stream_name: "QUIZ_EVENTS".to_string(),
            subjects: vec!["quiz.events.>".to_string()],
            ack_wait: Duration::from_secs(30),
            max_deliver: -1,
            duplicate_window: Duration::from_secs(120),
        }
    }
}

/// EventBus implementation using NATS JetStream
///
/// Publishes are acknowledged by the stream and carry the message key in the
/// `Nats-Msg-Id` header, so a republish of the same event inside the
/// duplicate window is dropped server-side. Subscriptions are durable pull
/// consumers named after the consumer group, with explicit acks.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus, NatsBusConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client, NatsBusConfig::default());
/// bus.ensure_stream().await?;
///
/// bus.publish("quiz.events.QuizDeleted", "event-id", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsBusConfig,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client, config: NatsBusConfig) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            config,
        }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Create the backing stream if it does not exist yet.
    ///
    /// Call once at startup; publishes to subjects without a stream are
    /// rejected by the server.
    pub async fn ensure_stream(&self) -> BusResult<()> {
        self.stream().await.map(|_| ())
    }

    async fn stream(&self) -> BusResult<stream::Stream> {
        let cfg = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.subjects.clone(),
            duplicate_window: self.config.duplicate_window,
            max_age: Duration::from_secs(60 * 60 * 24 * 14),
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(cfg)
            .await
            .map_err(|e| BusError::ConnectionError(format!("ensure stream {}: {e}", self.config.stream_name)))
    }
}

fn classify_publish_error(kind: PublishErrorKind, detail: String) -> BusError {
    match kind {
        PublishErrorKind::StreamNotFound
        | PublishErrorKind::WrongLastMessageId
        | PublishErrorKind::WrongLastSequence => BusError::Rejected(detail),
        _ => BusError::PublishError(detail),
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }

    async fn nak(self: Box<Self>, delay: Duration) -> BusResult<()> {
        let delay = (!delay.is_zero()).then_some(delay);
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

fn to_delivery(message: jetstream::Message) -> Delivery {
    let mut msg = BusMessage::new(
        message.message.subject.to_string(),
        message.message.payload.to_vec(),
    );

    if let Some(nats_headers) = &message.message.headers {
        let mut headers = HashMap::new();
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        if let Some(id) = headers.get("Nats-Msg-Id") {
            msg = msg.with_key(id.clone());
        }
        if !headers.is_empty() {
            msg = msg.with_headers(headers);
        }
    }

    let delivered = message
        .info()
        .map(|info| info.delivered.max(1) as u64)
        .unwrap_or(1);

    Delivery::new(msg, delivered, Box::new(JetStreamAcker { message }))
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, key: &str, payload: Vec<u8>) -> BusResult<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, key);

        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| classify_publish_error(e.kind(), e.to_string()))?;

        ack.await
            .map_err(|e| classify_publish_error(e.kind(), e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        if group.is_empty() || group.contains(['.', '*', '>', ' ']) {
            return Err(BusError::InvalidSubject(format!("invalid consumer group name: {group}")));
        }

        let stream = self.stream().await?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let deliveries = messages.map(|item| match item {
            Ok(message) => Ok(to_delivery(message)),
            Err(e) => Err(BusError::SubscribeError(e.to_string())),
        });

        Ok(deliveries.boxed())
    }
}
