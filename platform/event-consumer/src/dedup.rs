//! Idempotency gate
//!
//! Records which events each consumer has fully processed. The key is
//! `(event_id, consumer)`: independent consumers sharing a database keep
//! separate records, while the broker loop and the webhook entry of the same
//! consumer share one.

use crate::error::ConsumerError;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait DedupGate: Send + Sync {
    /// Has `consumer` already processed this event?
    async fn is_processed(&self, event_id: Uuid, consumer: &str) -> Result<bool, ConsumerError>;

    /// Record successful processing. Recording twice is a no-op.
    async fn mark_processed(
        &self,
        event_id: Uuid,
        event_type: &str,
        consumer: &str,
    ) -> Result<(), ConsumerError>;
}

/// Apply the `processed_events` schema
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./db/migrations");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Postgres-backed gate (`processed_events` table)
#[derive(Debug, Clone)]
pub struct PgDedupGate {
    pool: PgPool,
}

impl PgDedupGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupGate for PgDedupGate {
    async fn is_processed(&self, event_id: Uuid, consumer: &str) -> Result<bool, ConsumerError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1 AND consumer = $2)",
        )
        .bind(event_id)
        .bind(consumer)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        event_type: &str,
        consumer: &str,
    ) -> Result<(), ConsumerError> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, consumer, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, consumer) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(consumer)
        .bind(event_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-process gate for tests and local development
#[derive(Debug, Clone, Default)]
pub struct InMemoryDedupGate {
    processed: Arc<Mutex<HashSet<(Uuid, String)>>>,
}

impl InMemoryDedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.processed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processed.lock().await.is_empty()
    }
}

#[async_trait]
impl DedupGate for InMemoryDedupGate {
    async fn is_processed(&self, event_id: Uuid, consumer: &str) -> Result<bool, ConsumerError> {
        let processed = self.processed.lock().await;
        Ok(processed.contains(&(event_id, consumer.to_string())))
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        _event_type: &str,
        consumer: &str,
    ) -> Result<(), ConsumerError> {
        self.processed
            .lock()
            .await
            .insert((event_id, consumer.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_gate_is_keyed_by_consumer() {
        let gate = InMemoryDedupGate::new();
        let id = Uuid::new_v4();

        assert!(!gate.is_processed(id, "grading").await.unwrap());
        gate.mark_processed(id, "AttemptFinalized", "grading").await.unwrap();
        gate.mark_processed(id, "AttemptFinalized", "grading").await.unwrap();

        assert!(gate.is_processed(id, "grading").await.unwrap());
        assert!(!gate.is_processed(id, "search").await.unwrap());
        assert_eq!(gate.len().await, 1);
    }
}
