use event_bus::BusError;
use std::time::Duration;

/// Errors produced while processing a consumed event
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The message can never be processed; redelivery will not fix it
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("handler for {event_type} failed: {message}")]
    HandlerFailed { event_type: String, message: String },

    #[error("handler for {event_type} did not finish within {timeout:?}")]
    HandlerTimeout {
        event_type: String,
        timeout: Duration,
    },

    #[error("dedup store error: {0}")]
    Dedup(#[from] sqlx::Error),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),
}

impl ConsumerError {
    /// Whether the broker should deliver the message again.
    ///
    /// Malformed messages are acknowledged and dropped. Everything else is
    /// nacked: a dedup store failure leaves no durable record of the outcome,
    /// so acking would risk losing the event.
    pub fn requires_redelivery(&self) -> bool {
        !matches!(self, ConsumerError::MalformedMessage(_))
    }
}
