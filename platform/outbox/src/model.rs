//! Outbox record types.

use crate::error::OutboxError;
use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery state of an outbox event.
///
/// Forward transitions only: `pending → publishing → published`,
/// `publishing → pending` (retry) and `publishing → dead`. The operator
/// requeue (`dead → pending`) is the single way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Publishing,
    Published,
    Dead,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Publishing,
        EventStatus::Published,
        EventStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Publishing => "publishing",
            EventStatus::Published => "published",
            EventStatus::Dead => "dead",
        }
    }

    /// `published` and `dead` are never touched by the dispatcher again
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Published | EventStatus::Dead)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "publishing" => Ok(EventStatus::Publishing),
            "published" => Ok(EventStatus::Published),
            "dead" => Ok(EventStatus::Dead),
            other => Err(OutboxError::UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted outbox record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// An event to be appended to the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// Build an event with a freshly generated id
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Use a caller-chosen id (producers retrying the same logical insert)
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    /// Build an event from a typed domain event
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, OutboxError> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(E::EVENT_TYPE, payload))
    }

    /// The event type becomes the last token(s) of a broker subject, so it
    /// must not be empty or carry whitespace, empty tokens or wildcards.
    pub fn validate(&self) -> Result<(), OutboxError> {
        let t = self.event_type.as_str();
        if t.is_empty() {
            return Err(OutboxError::InvalidEvent("event_type is empty".to_string()));
        }
        if t.contains(char::is_whitespace) || t.contains('*') || t.contains('>') {
            return Err(OutboxError::InvalidEvent(format!(
                "event_type '{t}' contains whitespace or wildcard characters"
            )));
        }
        if t.split('.').any(str::is_empty) {
            return Err(OutboxError::InvalidEvent(format!(
                "event_type '{t}' has an empty subject token"
            )));
        }
        Ok(())
    }

    /// The record as first stored: pending, never attempted, due immediately
    pub fn into_record(self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            event_id: self.event_id,
            event_type: self.event_type,
            payload: self.payload,
            status: EventStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
            last_error: None,
            published_at: None,
        }
    }
}

/// Outcome of a conditional state update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row matched the expected state and was updated
    Applied,
    /// The row is missing or no longer in the expected state; nothing changed
    Conflict,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Number of events per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub publishing: u64,
    pub published: u64,
    pub dead: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: EventStatus, count: u64) {
        match status {
            EventStatus::Pending => self.pending += count,
            EventStatus::Publishing => self.publishing += count,
            EventStatus::Published => self.published += count,
            EventStatus::Dead => self.dead += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.publishing + self.published + self.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::events::QuizDeleted;
    use serde_json::json;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in EventStatus::ALL {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
        assert!(matches!(
            "archived".parse::<EventStatus>(),
            Err(OutboxError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(EventStatus::Published.is_terminal());
        assert!(EventStatus::Dead.is_terminal());
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Publishing.is_terminal());
    }

    #[test]
    fn test_validate_event_type() {
        assert!(NewOutboxEvent::new("AttemptFinalized", json!({})).validate().is_ok());
        assert!(NewOutboxEvent::new("quiz.deleted", json!({})).validate().is_ok());

        for bad in ["", "has space", "wild.*", "tail.>", "a..b", ".lead"] {
            assert!(
                NewOutboxEvent::new(bad, json!({})).validate().is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_domain_event() {
        let event = QuizDeleted {
            quiz_id: Uuid::new_v4(),
            deleted_by: "instructor-1".to_string(),
            deleted_at: Utc::now(),
        };

        let new_event = NewOutboxEvent::from_event(&event).unwrap();
        assert_eq!(new_event.event_type, "QuizDeleted");
        assert_eq!(new_event.payload["quiz_id"], json!(event.quiz_id));
    }

    #[test]
    fn test_into_record_is_pending_and_due() {
        let now = Utc::now();
        let record = NewOutboxEvent::new("QuizDeleted", json!({"a": 1})).into_record(now);
        assert_eq!(record.status, EventStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.next_attempt_at, now);
        assert_eq!(record.created_at, record.updated_at);
    }
}
