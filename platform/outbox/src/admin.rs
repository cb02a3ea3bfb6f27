//! Operator surface
//!
//! Inspection of dead events and the manual requeue. Dead events are never
//! retried automatically; a requeue gives the event a fresh attempt budget.

use crate::error::OutboxError;
use crate::model::{EventStatus, OutboxEvent, StatusCounts, Transition};
use crate::store::OutboxStore;
use crate::writer::DispatchWaker;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct OutboxAdmin {
    store: Arc<dyn OutboxStore>,
    waker: Option<DispatchWaker>,
}

impl OutboxAdmin {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store, waker: None }
    }

    /// Wake an in-process dispatcher after a requeue
    pub fn with_waker(mut self, waker: DispatchWaker) -> Self {
        self.waker = Some(waker);
        self
    }

    pub async fn list_dead(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError> {
        self.store.list_by_status(EventStatus::Dead, limit).await
    }

    pub async fn show(&self, event_id: Uuid) -> Result<OutboxEvent, OutboxError> {
        self.store
            .get(event_id)
            .await?
            .ok_or(OutboxError::NotFound(event_id))
    }

    /// Reset a dead event to `pending` with zero attempts, due now
    pub async fn requeue(&self, event_id: Uuid) -> Result<OutboxEvent, OutboxError> {
        match self.store.requeue(event_id, Utc::now()).await? {
            Transition::Applied => {
                info!(event_id = %event_id, "Requeued dead outbox event");
                if let Some(waker) = &self.waker {
                    waker.wake();
                }
                self.show(event_id).await
            }
            Transition::Conflict => {
                let current = self.show(event_id).await?;
                Err(OutboxError::InvalidState {
                    event_id,
                    actual: current.status,
                    expected: EventStatus::Dead,
                })
            }
        }
    }

    pub async fn stats(&self) -> Result<StatusCounts, OutboxError> {
        self.store.status_counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewOutboxEvent;
    use crate::store::InMemoryOutboxStore;
    use serde_json::json;

    async fn dead_event(store: &InMemoryOutboxStore) -> Uuid {
        let event = NewOutboxEvent::new("AttemptFinalized", json!({"score": 3}));
        store.insert(&event).await.unwrap();
        let now = Utc::now();
        store
            .mark_publishing(event.event_id, EventStatus::Pending, 0, now)
            .await
            .unwrap();
        store.mark_dead(event.event_id, 0, "rejected", now).await.unwrap();
        event.event_id
    }

    #[tokio::test]
    async fn test_list_and_requeue_dead() {
        let store = InMemoryOutboxStore::new();
        let id = dead_event(&store).await;
        let admin = OutboxAdmin::new(Arc::new(store.clone()));

        let dead = admin.list_dead(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event_id, id);
        assert_eq!(dead[0].attempts, 1);

        let requeued = admin.requeue(id).await.unwrap();
        assert_eq!(requeued.status, EventStatus::Pending);
        assert_eq!(requeued.attempts, 0);

        let stats = admin.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dead, 0);
    }

    #[tokio::test]
    async fn test_requeue_rejects_non_dead() {
        let store = InMemoryOutboxStore::new();
        let event = NewOutboxEvent::new("QuizDeleted", json!({}));
        store.insert(&event).await.unwrap();
        let admin = OutboxAdmin::new(Arc::new(store));

        let err = admin.requeue(event.event_id).await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::InvalidState { actual: EventStatus::Pending, .. }
        ));

        let missing = admin.requeue(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_requeue_wakes_dispatcher() {
        let store = InMemoryOutboxStore::new();
        let id = dead_event(&store).await;
        let waker = DispatchWaker::new();
        let admin = OutboxAdmin::new(Arc::new(store)).with_waker(waker.clone());

        admin.requeue(id).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(100), waker.woken())
            .await
            .expect("requeue should wake the dispatcher");
    }
}
