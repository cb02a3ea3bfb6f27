//! # Transactional Outbox
//!
//! Durable, at-least-once delivery of domain events from a service's own
//! database to the event bus.
//!
//! ```text
//! business tx ──enqueue_event──▶ outbox_events (pending)
//!                                      │ find_due / mark_publishing (CAS)
//!                                      ▼
//!                                 Dispatcher ──publish(key = event_id)──▶ EventBus
//!                                      │
//!                       published │ pending (backoff) │ dead
//! ```
//!
//! - [`OutboxStore`]: record store; [`PgOutboxStore`] for production,
//!   [`InMemoryOutboxStore`] for tests
//! - [`enqueue_event`]: transaction-scoped insert for producers
//! - [`Dispatcher`]: poll/wake driven publisher with stuck-event reclaim
//! - [`BackoffPolicy`]: pure retry schedule
//! - [`OutboxAdmin`]: dead-event inspection and requeue

mod admin;
mod backoff;
mod dispatcher;
mod error;
mod model;
mod reclaimer;
mod store;
mod writer;

pub use admin::OutboxAdmin;
pub use backoff::{BackoffPolicy, Schedule};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig};
pub use error::OutboxError;
pub use model::{EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts, Transition};
pub use store::{run_migrations, InMemoryOutboxStore, OutboxStore, PgOutboxStore};
pub use writer::{enqueue_domain_event, enqueue_event, DispatchWaker};
