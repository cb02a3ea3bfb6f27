//! # Event Consumer
//!
//! Turns at-least-once broker deliveries into effectively-once side effects.
//!
//! - [`EventRouter`]: `event_type` → handler registry, typed via [`event_bus::DomainEvent`]
//! - [`DedupGate`]: durable "already processed by this consumer" record
//! - [`EventConsumer`]: decode → dedup → route → handle; ack on success or
//!   malformed input, nak on handler failure
//! - [`webhook::router`]: the same pipeline behind `POST /events`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{events::QuizDeleted, EventBus, InMemoryBus};
//! use event_consumer::{ConsumerConfig, EventConsumer, EventRouter, InMemoryDedupGate};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let router = EventRouter::new().on::<QuizDeleted, _, _>(|event| async move {
//!     tracing::info!(quiz_id = %event.payload.quiz_id, "dropping quiz from index");
//!     Ok(())
//! });
//!
//! let consumer = EventConsumer::new(
//!     ConsumerConfig { name: "search-indexer".into(), ..Default::default() },
//!     router,
//!     Arc::new(InMemoryDedupGate::new()),
//! );
//!
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! consumer.run(bus, "quiz.events.>", "search-indexer", CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod consumer;
mod dedup;
mod error;
mod router;
pub mod webhook;

pub use consumer::{ConsumerConfig, EventConsumer, ProcessOutcome};
pub use dedup::{run_migrations, DedupGate, InMemoryDedupGate, PgDedupGate};
pub use error::ConsumerError;
pub use router::{EventHandler, EventRouter, HandlerError};
