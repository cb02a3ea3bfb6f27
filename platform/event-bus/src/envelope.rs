//! # Event Envelope
//!
//! Wire format for every message the outbox dispatcher publishes.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Outbox identity of the event; consumers use it as the idempotency key
//! - `event_type`: Event kind, used by consumers to route to a handler
//! - `occurred_at`: When the event was written to the outbox
//! - `payload`: Event-specific document (schema-free on the wire)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard event envelope
///
/// # Type Parameter
///
/// * `T` - The payload type. Producers and generic consumers use
///   `serde_json::Value`; typed handlers decode into their own struct.
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// let envelope = EventEnvelope::new(
///     Uuid::new_v4(),
///     "QuizDeleted".to_string(),
///     json!({"quiz_id": "q-1"}),
/// );
/// let bytes = serde_json::to_vec(&envelope).unwrap();
/// let decoded = event_bus::decode_envelope(&bytes).unwrap();
/// assert_eq!(decoded.event_id, envelope.event_id);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Event kind (e.g. "AttemptFinalized")
    pub event_type: String,

    /// ISO 8601 timestamp when the event was recorded
    pub occurred_at: DateTime<Utc>,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(event_id: Uuid, event_type: String, payload: T) -> Self {
        Self {
            event_id,
            event_type,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Set the occurrence timestamp (the outbox row's `created_at`)
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Reasons a raw message could not be turned into an envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("payload is not a JSON object: {0}")]
    NotJson(String),

    #[error("missing or invalid event_id")]
    InvalidEventId,

    #[error("missing or empty event_type")]
    MissingEventType,

    #[error("missing payload")]
    MissingPayload,
}

/// Decode raw message bytes into a generic envelope.
///
/// # Validation Rules
///
/// - `event_id`: Must be a string holding a valid UUID
/// - `event_type`: Must be a non-empty string
/// - `payload`: Must be present (any JSON value, including `null`)
/// - `occurred_at`: Optional on the wire; defaults to the decode time
///
/// Validation is field-by-field so that a message missing its identity is
/// reported as such, rather than as a generic parse failure.
pub fn decode_envelope(bytes: &[u8]) -> Result<EventEnvelope<serde_json::Value>, EnvelopeError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::NotJson(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| EnvelopeError::NotJson("top-level value is not an object".to_string()))?;

    let event_id = object
        .get("event_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(EnvelopeError::InvalidEventId)?;

    let event_type = object
        .get("event_type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or(EnvelopeError::MissingEventType)?
        .to_string();

    let payload = object
        .get("payload")
        .cloned()
        .ok_or(EnvelopeError::MissingPayload)?;

    let occurred_at = object
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(EventEnvelope {
        event_id,
        event_type,
        occurred_at,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_valid_envelope() {
        let bytes = serde_json::to_vec(&json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "AttemptFinalized",
            "occurred_at": "2024-01-01T00:00:00Z",
            "payload": {"attempt_id": "a-1"}
        }))
        .unwrap();

        let envelope = decode_envelope(&bytes).expect("valid envelope");
        assert_eq!(
            envelope.event_id,
            Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
        );
        assert_eq!(envelope.event_type, "AttemptFinalized");
        assert_eq!(envelope.payload["attempt_id"], "a-1");
        assert_eq!(envelope.occurred_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_decode_missing_event_id() {
        let bytes = serde_json::to_vec(&json!({
            "event_type": "AttemptFinalized",
            "payload": {}
        }))
        .unwrap();

        assert_eq!(decode_envelope(&bytes), Err(EnvelopeError::InvalidEventId));
    }

    #[test]
    fn test_decode_malformed_event_id() {
        let bytes = serde_json::to_vec(&json!({
            "event_id": "not-a-uuid",
            "event_type": "AttemptFinalized",
            "payload": {}
        }))
        .unwrap();

        assert_eq!(decode_envelope(&bytes), Err(EnvelopeError::InvalidEventId));
    }

    #[test]
    fn test_decode_empty_event_type() {
        let bytes = serde_json::to_vec(&json!({
            "event_id": Uuid::new_v4(),
            "event_type": "  ",
            "payload": {}
        }))
        .unwrap();

        assert_eq!(decode_envelope(&bytes), Err(EnvelopeError::MissingEventType));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_envelope(b"\xff\x00garbage"),
            Err(EnvelopeError::NotJson(_))
        ));
        assert!(matches!(
            decode_envelope(b"[1,2,3]"),
            Err(EnvelopeError::NotJson(_))
        ));
    }

    #[test]
    fn test_null_payload_is_accepted() {
        let bytes = serde_json::to_vec(&json!({
            "event_id": Uuid::new_v4(),
            "event_type": "QuizDeleted",
            "payload": null
        }))
        .unwrap();

        let envelope = decode_envelope(&bytes).expect("null payload is still a payload");
        assert!(envelope.payload.is_null());
    }
}
