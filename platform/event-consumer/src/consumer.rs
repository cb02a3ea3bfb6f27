//! Broker consumer loop
//!
//! One message at a time per subscription:
//!
//! 1. decode the envelope (undecodable → ack and skip)
//! 2. dedup gate (already processed → ack without calling the handler)
//! 3. route by `event_type` (no handler → mark processed, ack)
//! 4. run the handler under a timeout
//! 5. success → mark processed, ack; failure → nak so the broker redelivers
//!
//! There is no retry timer here. Redelivery by the broker is the retry; the
//! nak asks for a delay that grows with the delivery count.

use crate::dedup::DedupGate;
use crate::error::ConsumerError;
use crate::router::{EventRouter, HandlerError};
use event_bus::{decode_envelope, Delivery, EventBus, EventEnvelope, RedeliveryBackoff};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer identity; scopes the dedup records
    pub name: String,
    pub handler_timeout: Duration,
    /// Delay requested from the broker before a failed message comes back
    pub redelivery: RedeliveryBackoff,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "event-consumer".to_string(),
            handler_timeout: Duration::from_secs(30),
            redelivery: RedeliveryBackoff::default(),
        }
    }
}

/// How a message that needs no redelivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A handler ran successfully
    Handled,
    /// Already processed by this consumer; handler not called
    Duplicate,
    /// No handler for the event type; recorded as processed
    Unrouted,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Handled => "processed",
            ProcessOutcome::Duplicate => "duplicate",
            ProcessOutcome::Unrouted => "unrouted",
        }
    }
}

/// Idempotent event consumer
pub struct EventConsumer {
    config: ConsumerConfig,
    router: EventRouter,
    dedup: Arc<dyn DedupGate>,
}

impl EventConsumer {
    pub fn new(config: ConsumerConfig, router: EventRouter, dedup: Arc<dyn DedupGate>) -> Self {
        Self {
            config,
            router,
            dedup,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Process one raw message body.
    ///
    /// Returns an error for malformed messages and for failures that need a
    /// redelivery; see [`ConsumerError::requires_redelivery`].
    pub async fn process_payload(&self, bytes: &[u8]) -> Result<ProcessOutcome, ConsumerError> {
        let envelope =
            decode_envelope(bytes).map_err(|e| ConsumerError::MalformedMessage(e.to_string()))?;
        self.process_envelope(&envelope).await
    }

    pub async fn process_envelope(
        &self,
        envelope: &EventEnvelope<Value>,
    ) -> Result<ProcessOutcome, ConsumerError> {
        let consumer = self.config.name.as_str();
        let event_id = envelope.event_id;
        let event_type = envelope.event_type.as_str();

        if self.dedup.is_processed(event_id, consumer).await? {
            debug!(event_id = %event_id, event_type = %event_type, "Event already processed, skipping");
            return Ok(ProcessOutcome::Duplicate);
        }

        let Some(handler) = self.router.handler_for(event_type) else {
            debug!(event_id = %event_id, event_type = %event_type, "No handler registered, ignoring");
            self.dedup.mark_processed(event_id, event_type, consumer).await?;
            return Ok(ProcessOutcome::Unrouted);
        };

        match tokio::time::timeout(self.config.handler_timeout, handler.handle(envelope)).await {
            Err(_) => {
                return Err(ConsumerError::HandlerTimeout {
                    event_type: event_type.to_string(),
                    timeout: self.config.handler_timeout,
                })
            }
            Ok(Err(HandlerError::Decode { source, .. })) => {
                return Err(ConsumerError::MalformedMessage(format!(
                    "{event_type} payload: {source}"
                )))
            }
            Ok(Err(HandlerError::Failed(e))) => {
                return Err(ConsumerError::HandlerFailed {
                    event_type: event_type.to_string(),
                    message: format!("{e:#}"),
                })
            }
            Ok(Ok(())) => {}
        }

        self.dedup.mark_processed(event_id, event_type, consumer).await?;
        info!(event_id = %event_id, event_type = %event_type, "Event processed successfully");
        Ok(ProcessOutcome::Handled)
    }

    /// Consume `subject` as member of `group` until `token` is cancelled or
    /// the subscription ends.
    ///
    /// Only the subscribe call itself can fail this function; per-message
    /// errors are settled with ack/nak and logged.
    pub async fn run(
        &self,
        bus: Arc<dyn EventBus>,
        subject: &str,
        group: &str,
        token: CancellationToken,
    ) -> Result<(), ConsumerError> {
        let mut deliveries = bus.subscribe(subject, group).await?;
        info!(consumer = %self.config.name, subject = %subject, group = %group, "Consumer subscribed");

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                Some(Err(e)) => warn!(error = %e, "Failed to receive message"),
                None => {
                    warn!(subject = %subject, "Subscription stream ended");
                    break;
                }
            }
        }

        info!(consumer = %self.config.name, "Consumer stopped");
        Ok(())
    }

    /// Process a delivery and settle it with the broker
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let span = info_span!(
            "consume_event",
            consumer = %self.config.name,
            subject = %delivery.message.subject,
            delivered = delivery.delivered,
        );

        async move {
            let (message, delivered, acker) = delivery.into_parts();

            let settled = match self.process_payload(&message.payload).await {
                Ok(outcome) => {
                    debug!(outcome = outcome.as_str(), "Acking message");
                    acker.ack().await
                }
                Err(e) if !e.requires_redelivery() => {
                    warn!(error = %e, "Skipping malformed message");
                    acker.ack().await
                }
                Err(e) => {
                    let delay = self.config.redelivery.delay_for(delivered);
                    warn!(
                        error = %e,
                        redeliver_in_ms = delay.as_millis() as u64,
                        "Event processing failed, requesting redelivery"
                    );
                    acker.nak(delay).await
                }
            };

            if let Err(e) = settled {
                error!(error = %e, "Failed to settle message with broker");
            }
        }
        .instrument(span)
        .await
    }
}
