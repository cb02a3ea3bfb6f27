//! # EventBus Abstraction
//!
//! Broker-facing seam shared by the outbox dispatcher (producer side) and the
//! event consumer loop (consumer side).
//!
//! ## Delivery Model
//!
//! - **Keyed publish**: every message carries a key (the outbox `event_id`).
//!   Brokers that support it use the key for duplicate suppression.
//! - **Consumer groups**: subscribers join a named group. Members of the same
//!   group compete for messages; each message goes to one member.
//! - **Explicit acknowledgement**: a [`Delivery`] must be acked once it has been
//!   handled or nacked to ask the broker for redelivery. Redelivery is the
//!   only retry mechanism on the consumer side; [`RedeliveryBackoff`] spaces
//!   redeliveries out by delivery count.
//!
//! ## Implementations
//!
//! - **NatsBus**: NATS JetStream (durable pull consumers, `Nats-Msg-Id` dedup)
//! - **InMemoryBus**: in-process channels for tests and local development
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let mut deliveries = bus.subscribe("quiz.events.>", "grading").await?;
//! bus.publish("quiz.events.QuizDeleted", "5f0c...", b"{}".to_vec()).await?;
//!
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("{} bytes on {}", delivery.message.payload.len(), delivery.message.subject);
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
pub mod events;
mod inmemory_bus;
mod nats_bus;
mod redelivery;

pub use envelope::{decode_envelope, EnvelopeError, EventEnvelope};
pub use events::DomainEvent;
pub use inmemory_bus::{GroupStats, InMemoryBus};
pub use nats_bus::{NatsBus, NatsBusConfig};
pub use redelivery::RedeliveryBackoff;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// A message travelling over the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// Message key (idempotency token), when the publisher supplied one
    pub key: Option<String>,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Broker headers, if any
    pub headers: HashMap<String, String>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            key: None,
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    /// Confirm the message; the broker will not deliver it to this group again.
    async fn ack(self: Box<Self>) -> BusResult<()>;

    /// Reject the message; the broker redelivers it (possibly to another
    /// member) once `delay` has passed. A zero delay redelivers immediately.
    async fn nak(self: Box<Self>, delay: Duration) -> BusResult<()>;
}

/// A message received through a consumer group subscription.
pub struct Delivery {
    pub message: BusMessage,
    /// Delivery count as reported by the broker (1 on first delivery)
    pub delivered: u64,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: BusMessage, delivered: u64, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            delivered,
            acker,
        }
    }

    pub async fn ack(self) -> BusResult<()> {
        self.acker.ack().await
    }

    pub async fn nak(self) -> BusResult<()> {
        self.acker.nak(Duration::ZERO).await
    }

    pub async fn nak_after(self, delay: Duration) -> BusResult<()> {
        self.acker.nak(delay).await
    }

    /// Split the delivery so the message can be inspected by value while the
    /// acknowledgement is settled later.
    pub fn into_parts(self) -> (BusMessage, u64, Box<dyn Acknowledger>) {
        (self.message, self.delivered, self.acker)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    /// The broker accepted the connection but refused the message itself.
    #[error("message rejected by broker: {0}")]
    Rejected(String),

    #[error("broker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("failed to settle delivery: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl BusError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// `Rejected` and `InvalidSubject` describe the message itself; sending it
    /// again will not change the outcome.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BusError::Rejected(_) | BusError::InvalidSubject(_))
    }
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject under an idempotency key.
    ///
    /// Returns once the broker has accepted the message. Implementations must
    /// report refusals of the message itself as [`BusError::Rejected`] and
    /// everything else (network, broker availability) as a transient error.
    async fn publish(&self, subject: &str, key: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Join consumer group `group` for messages matching `subject`.
    ///
    /// Wildcards follow NATS conventions: `*` matches one token, `>` matches
    /// one or more trailing tokens. Every yielded [`Delivery`] must be acked or
    /// nacked.
    async fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
