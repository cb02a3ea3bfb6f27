use super::OutboxStore;
use crate::error::OutboxError;
use crate::model::{EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str = "event_id, event_type, payload, status, attempts, next_attempt_at, \
                       created_at, updated_at, last_error, published_at";

/// Apply the outbox schema.
///
/// Missing versions are ignored so that several crates can migrate the same
/// database with their own migration sets.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./db/migrations");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Postgres-backed outbox store (`outbox_events` table)
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    event_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_error: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEvent {
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse()?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_error: row.last_error,
            published_at: row.published_at,
        })
    }
}

fn into_events(rows: Vec<OutboxRow>) -> Result<Vec<OutboxEvent>, OutboxError> {
    rows.into_iter().map(OutboxEvent::try_from).collect()
}

fn transition(rows_affected: u64) -> Transition {
    if rows_affected == 1 {
        Transition::Applied
    } else {
        Transition::Conflict
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// `attempts` is an INTEGER column
fn attempts_param(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

/// Insert on a caller-owned executor (pool or open transaction)
pub(crate) async fn insert_with<'e, E>(
    executor: E,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<(), OutboxError>
where
    E: sqlx::PgExecutor<'e>,
{
    event.validate()?;

    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (event_id, event_type, payload, status, attempts, next_attempt_at, created_at, updated_at)
        VALUES ($1, $2, $3, 'pending', 0, $4, $4, $4)
        "#,
    )
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(now)
    .execute(executor)
    .await
    .map_err(|e| OutboxError::from_insert(event.event_id, e))?;

    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, event: &NewOutboxEvent) -> Result<(), OutboxError> {
        insert_with(&self.pool, event, Utc::now()).await
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_events
            WHERE status = 'pending' AND next_attempt_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        into_events(rows)
    }

    async fn mark_publishing(
        &self,
        event_id: Uuid,
        expected_status: EventStatus,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'publishing', updated_at = $4
            WHERE event_id = $1 AND status = $2 AND attempts = $3
            "#,
        )
        .bind(event_id)
        .bind(expected_status.as_str())
        .bind(attempts_param(expected_attempts))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(transition(result.rows_affected()))
    }

    async fn mark_published(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'published',
                attempts = attempts + 1,
                published_at = $3,
                updated_at = $3
            WHERE event_id = $1 AND status = 'publishing' AND attempts = $2
            "#,
        )
        .bind(event_id)
        .bind(attempts_param(expected_attempts))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(transition(result.rows_affected()))
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                attempts = attempts + 1,
                next_attempt_at = $3,
                last_error = $4,
                updated_at = $5
            WHERE event_id = $1 AND status = 'publishing' AND attempts = $2
            "#,
        )
        .bind(event_id)
        .bind(attempts_param(expected_attempts))
        .bind(next_attempt_at)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(transition(result.rows_affected()))
    }

    async fn mark_dead(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'dead',
                attempts = attempts + 1,
                last_error = $3,
                updated_at = $4
            WHERE event_id = $1 AND status = 'publishing' AND attempts = $2
            "#,
        )
        .bind(event_id)
        .bind(attempts_param(expected_attempts))
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(transition(result.rows_affected()))
    }

    async fn find_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_events
            WHERE status = 'publishing' AND updated_at <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        into_events(rows)
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {COLUMNS} FROM outbox_events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxEvent::try_from).transpose()
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_events
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(status.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        into_events(rows)
    }

    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<Transition, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                attempts = 0,
                next_attempt_at = $2,
                updated_at = $2
            WHERE event_id = $1 AND status = 'dead'
            "#,
        )
        .bind(event_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(transition(result.rows_affected()))
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM outbox_events GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}
