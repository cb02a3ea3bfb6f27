//! Outbox writer
//!
//! Events are appended inside the caller's transaction, so the event becomes
//! durable exactly when the business change that produced it does.

use crate::error::OutboxError;
use crate::model::NewOutboxEvent;
use crate::store::insert_with;
use chrono::Utc;
use event_bus::DomainEvent;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Insert an event into the outbox within an open transaction
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewOutboxEvent,
) -> Result<(), OutboxError> {
    insert_with(&mut **tx, event, Utc::now()).await
}

/// Insert a typed domain event; returns the generated event id
pub async fn enqueue_domain_event<E: DomainEvent>(
    tx: &mut Transaction<'_, Postgres>,
    event: &E,
) -> Result<Uuid, OutboxError> {
    let new_event = NewOutboxEvent::from_event(event)?;
    enqueue_event(tx, &new_event).await?;
    Ok(new_event.event_id)
}

/// In-process signal that new events were written.
///
/// Waking only shortens the wait before the dispatcher's next tick; the tick
/// itself still discovers work through `find_due`. A wake with no dispatcher
/// waiting is remembered, so a signal sent between ticks is not lost.
#[derive(Debug, Clone, Default)]
pub struct DispatchWaker {
    notify: Arc<Notify>,
}

impl DispatchWaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.notify.notified().await;
    }
}
