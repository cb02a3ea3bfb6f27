use crate::model::EventStatus;
use uuid::Uuid;

/// Errors raised by the outbox store and its operator surface
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox event {0} already exists")]
    DuplicateKey(Uuid),

    #[error("invalid outbox event: {0}")]
    InvalidEvent(String),

    #[error("outbox event {0} not found")]
    NotFound(Uuid),

    #[error("outbox event {event_id} is {actual}, expected {expected}")]
    InvalidState {
        event_id: Uuid,
        actual: EventStatus,
        expected: EventStatus,
    },

    #[error("unknown outbox status '{0}'")]
    UnknownStatus(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// Map a sqlx error from an INSERT, turning a primary-key violation into
    /// [`OutboxError::DuplicateKey`].
    pub(crate) fn from_insert(event_id: Uuid, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::DuplicateKey(event_id),
            _ => Self::Database(err),
        }
    }
}
