//! Common test utilities for consumer tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use event_bus::events::{AttemptFinalized, QuizDeleted};
use event_bus::EventEnvelope;
use event_consumer::{ConsumerError, DedupGate, EventRouter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counts handler invocations; fails the first `fail_first` calls
#[derive(Clone, Default)]
pub struct Counter {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: n,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns whether this call should succeed
    pub fn hit(&self) -> bool {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        n >= self.fail_first
    }
}

/// Router with an `AttemptFinalized` handler backed by `counter`
pub fn attempt_router(counter: Counter) -> EventRouter {
    EventRouter::new().on::<AttemptFinalized, _, _>(move |_event| {
        let counter = counter.clone();
        async move {
            if counter.hit() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("grade store unavailable"))
            }
        }
    })
}

pub fn attempt_payload() -> Value {
    json!({
        "attempt_id": Uuid::new_v4(),
        "quiz_id": Uuid::new_v4(),
        "user_id": "student-1",
        "score": 8,
        "max_score": 10,
        "finalized_at": Utc::now(),
    })
}

pub fn quiz_deleted_payload() -> Value {
    serde_json::to_value(QuizDeleted {
        quiz_id: Uuid::new_v4(),
        deleted_by: "instructor-1".to_string(),
        deleted_at: Utc::now(),
    })
    .unwrap()
}

pub fn message(event_id: Uuid, event_type: &str, payload: Value) -> Vec<u8> {
    serde_json::to_vec(&EventEnvelope::new(event_id, event_type.to_string(), payload)).unwrap()
}

/// Dedup gate whose store is down
pub struct BrokenDedupGate;

#[async_trait]
impl DedupGate for BrokenDedupGate {
    async fn is_processed(&self, _event_id: Uuid, _consumer: &str) -> Result<bool, ConsumerError> {
        Err(ConsumerError::Dedup(sqlx::Error::PoolTimedOut))
    }

    async fn mark_processed(
        &self,
        _event_id: Uuid,
        _event_type: &str,
        _consumer: &str,
    ) -> Result<(), ConsumerError> {
        Err(ConsumerError::Dedup(sqlx::Error::PoolTimedOut))
    }
}
