use super::OutboxStore;
use crate::error::OutboxError;
use crate::model::{EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outbox store held in process memory.
///
/// Same conditional-update semantics as [`super::PgOutboxStore`]; the mutex
/// stands in for the database's row-level atomicity. Used by tests and by
/// the relay when run without a database.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<Uuid, Row>,
    next_seq: u64,
}

struct Row {
    // Tie-breaker for rows created within the same clock tick
    seq: u64,
    event: OutboxEvent,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted<'a>(
        rows: impl Iterator<Item = &'a Row>,
        key: impl Fn(&OutboxEvent) -> DateTime<Utc>,
        limit: usize,
    ) -> Vec<OutboxEvent> {
        let mut matching: Vec<&Row> = rows.collect();
        matching.sort_by_key(|r| (key(&r.event), r.seq));
        matching
            .into_iter()
            .take(limit)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Apply `f` to the row if it is still the `publishing` claim made at
    /// `expected_attempts`
    async fn settle(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut OutboxEvent),
    ) -> Transition {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&event_id) {
            Some(row)
                if row.event.status == EventStatus::Publishing
                    && row.event.attempts == expected_attempts =>
            {
                row.event.attempts = row.event.attempts.saturating_add(1);
                row.event.updated_at = now;
                f(&mut row.event);
                Transition::Applied
            }
            _ => Transition::Conflict,
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, event: &NewOutboxEvent) -> Result<(), OutboxError> {
        event.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.rows.contains_key(&event.event_id) {
            return Err(OutboxError::DuplicateKey(event.event_id));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.insert(
            event.event_id,
            Row {
                seq,
                event: event.clone().into_record(Utc::now()),
            },
        );
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let inner = self.inner.lock().await;
        let due = inner.rows.values().filter(|r| {
            r.event.status == EventStatus::Pending && r.event.next_attempt_at <= now
        });
        Ok(Self::sorted(due, |e| e.created_at, limit))
    }

    async fn mark_publishing(
        &self,
        event_id: Uuid,
        expected_status: EventStatus,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&event_id) {
            Some(row)
                if row.event.status == expected_status
                    && row.event.attempts == expected_attempts =>
            {
                row.event.status = EventStatus::Publishing;
                row.event.updated_at = now;
                Ok(Transition::Applied)
            }
            _ => Ok(Transition::Conflict),
        }
    }

    async fn mark_published(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        Ok(self
            .settle(event_id, expected_attempts, now, |e| {
                e.status = EventStatus::Published;
                e.published_at = Some(now);
            })
            .await)
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        Ok(self
            .settle(event_id, expected_attempts, now, |e| {
                e.status = EventStatus::Pending;
                e.next_attempt_at = next_attempt_at;
                e.last_error = Some(error.to_string());
            })
            .await)
    }

    async fn mark_dead(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        Ok(self
            .settle(event_id, expected_attempts, now, |e| {
                e.status = EventStatus::Dead;
                e.last_error = Some(error.to_string());
            })
            .await)
    }

    async fn find_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let inner = self.inner.lock().await;
        let stuck = inner.rows.values().filter(|r| {
            r.event.status == EventStatus::Publishing && r.event.updated_at <= cutoff
        });
        Ok(Self::sorted(stuck, |e| e.updated_at, limit))
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let inner = self.inner.lock().await;
        Ok(inner.rows.get(&event_id).map(|r| r.event.clone()))
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let inner = self.inner.lock().await;
        let matching = inner.rows.values().filter(|r| r.event.status == status);
        Ok(Self::sorted(matching, |e| e.created_at, limit))
    }

    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<Transition, OutboxError> {
        let mut inner = self.inner.lock().await;
        match inner.rows.get_mut(&event_id) {
            Some(row) if row.event.status == EventStatus::Dead => {
                row.event.status = EventStatus::Pending;
                row.event.attempts = 0;
                row.event.next_attempt_at = now;
                row.event.updated_at = now;
                Ok(Transition::Applied)
            }
            _ => Ok(Transition::Conflict),
        }
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for row in inner.rows.values() {
            counts.add(row.event.status, 1);
        }
        Ok(counts)
    }
}
