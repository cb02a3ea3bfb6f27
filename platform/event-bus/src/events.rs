//! Known domain event kinds.
//!
//! A [`DomainEvent`] ties a payload struct to the `event_type` string it is
//! recorded and routed under. Producers build outbox records from these types;
//! consumers register typed handlers for them. Anything in between (store,
//! dispatcher, broker) treats the payload as an opaque JSON document.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A payload type with a fixed event kind name.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Routing name of the event kind. Must be a valid subject token sequence.
    const EVENT_TYPE: &'static str;
}

/// A quiz attempt was submitted and scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFinalized {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: String,
    pub score: u32,
    pub max_score: u32,
    pub finalized_at: DateTime<Utc>,
}

impl DomainEvent for AttemptFinalized {
    const EVENT_TYPE: &'static str = "AttemptFinalized";
}

/// A quiz was removed; downstream read models should drop it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizDeleted {
    pub quiz_id: Uuid,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
}

impl DomainEvent for QuizDeleted {
    const EVENT_TYPE: &'static str = "QuizDeleted";
}
