//! Event record store
//!
//! The store is the single source of truth for delivery state. Every state
//! change is a single-row conditional update, so any number of dispatcher
//! processes can share one store without further coordination.

mod memory;
mod postgres;

pub use memory::InMemoryOutboxStore;
pub use postgres::{run_migrations, PgOutboxStore};
pub(crate) use postgres::insert_with;

use crate::error::OutboxError;
use crate::model::{EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append a new pending event, due immediately.
    ///
    /// Fails with [`OutboxError::DuplicateKey`] if the id already exists.
    async fn insert(&self, event: &NewOutboxEvent) -> Result<(), OutboxError>;

    /// Pending events with `next_attempt_at <= now`, oldest first
    async fn find_due(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Claim an event for publishing.
    ///
    /// Applies only if the row is still in `expected_status` with
    /// `expected_attempts` attempts; otherwise another worker got there first.
    async fn mark_publishing(
        &self,
        event_id: Uuid,
        expected_status: EventStatus,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError>;

    /// `publishing → published`, counting the attempt.
    ///
    /// Like the settle transitions below, this applies only while the row is
    /// still `publishing` with `expected_attempts`, i.e. still the claim the
    /// caller made. A settle from a stale snapshot gets `Conflict`.
    async fn mark_published(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError>;

    /// `publishing → pending`, counting the attempt and recording the failure
    async fn mark_failed(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError>;

    /// `publishing → dead`, counting the attempt and recording the failure
    async fn mark_dead(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError>;

    /// Events in `publishing` whose last update is at or before `cutoff`
    async fn find_stuck(&self, cutoff: DateTime<Utc>, limit: usize)
        -> Result<Vec<OutboxEvent>, OutboxError>;

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError>;

    /// Events in `status`, oldest first
    async fn list_by_status(&self, status: EventStatus, limit: usize)
        -> Result<Vec<OutboxEvent>, OutboxError>;

    /// `dead → pending` with the attempt count reset and due immediately
    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<Transition, OutboxError>;

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError>;
}
