//! Outbox dispatcher
//!
//! Drains due events from the store to the event bus. Each tick first
//! reclaims events stuck in `publishing`, then claims and publishes a batch
//! of due events with bounded concurrency.
//!
//! ## Claiming
//!
//! An event is claimed with a conditional update (`pending` with the attempt
//! count that was read → `publishing`). Exactly one of several racing
//! dispatchers wins; the others see `Conflict` and skip the event. No other
//! synchronization is used, so any number of dispatcher processes can run
//! against the same store.
//!
//! ## Failure path
//!
//! A failed publish counts as an attempt. Transient failures are rescheduled
//! by the backoff policy until the budget is spent; broker rejections go
//! straight to `dead`.

use crate::backoff::BackoffPolicy;
use crate::model::{EventStatus, OutboxEvent, Transition};
use crate::store::OutboxStore;
use crate::writer::DispatchWaker;
use chrono::{DateTime, Utc};
use event_bus::{BusError, EventBus, EventEnvelope};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Subject prefix; events go to `<topic>.<event_type>`
    pub topic: String,
    pub poll_interval: Duration,
    /// Maximum events claimed per tick
    pub batch_size: usize,
    /// Maximum concurrent publishes within a tick
    pub max_in_flight: usize,
    pub publish_timeout: Duration,
    /// Age after which a `publishing` event is considered abandoned.
    /// Must be longer than `publish_timeout`.
    pub reclaim_after: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: "quiz.events".to_string(),
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_in_flight: 16,
            publish_timeout: Duration::from_secs(10),
            reclaim_after: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What a tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events moved to `publishing` by this dispatcher
    pub claimed: u64,
    pub published: u64,
    /// Rescheduled after a failure
    pub retried: u64,
    pub dead: u64,
    /// Claims or settlements lost to another worker
    pub conflicts: u64,
    /// Store errors; the affected events are left for a later tick
    pub errors: u64,
    /// Stuck `publishing` events routed back through the failure path
    pub reclaimed: u64,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.claimed += other.claimed;
        self.published += other.published;
        self.retried += other.retried;
        self.dead += other.dead;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.reclaimed += other.reclaimed;
    }

    pub fn is_idle(&self) -> bool {
        *self == DispatchReport::default()
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published => self.published += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Dead => self.dead += 1,
            Outcome::Conflict => self.conflicts += 1,
            Outcome::Error => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Published,
    Retried,
    Dead,
    Conflict,
    Error,
}

/// Moves due outbox events onto the event bus
pub struct Dispatcher {
    pub(crate) store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    pub(crate) config: DispatcherConfig,
    waker: DispatchWaker,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>, config: DispatcherConfig) -> Self {
        Self {
            store,
            bus,
            config,
            waker: DispatchWaker::new(),
        }
    }

    /// Share a waker with in-process writers
    pub fn with_waker(mut self, waker: DispatchWaker) -> Self {
        self.waker = waker;
        self
    }

    pub fn waker(&self) -> DispatchWaker {
        self.waker.clone()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn subject_for(&self, event_type: &str) -> String {
        format!("{}.{}", self.config.topic, event_type)
    }

    // A zero batch would claim nothing yet always look full
    pub(crate) fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Run until `token` is cancelled.
    ///
    /// A tick starts on the poll interval or when the waker fires. When a
    /// tick fills its whole batch the next one starts immediately. The token
    /// is checked between ticks; a tick in progress runs to completion.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            topic = %self.config.topic,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_in_flight = self.config.max_in_flight,
            "Starting outbox dispatcher"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backlog = false;

        loop {
            if backlog {
                if token.is_cancelled() {
                    break;
                }
            } else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = self.waker.woken() => {}
                }
            }

            let report = self.run_once(Utc::now()).await;
            backlog = report.claimed >= self.batch_size() as u64;

            if report.is_idle() {
                continue;
            }
            if report.dead > 0 || report.errors > 0 {
                warn!(?report, "Outbox dispatch tick finished with failures");
            } else {
                debug!(?report, "Outbox dispatch tick");
            }
        }

        info!("Outbox dispatcher stopped");
    }

    /// One tick: reclaim stuck events, then dispatch due ones
    pub async fn run_once(&self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = self.reclaim_stuck(now).await;
        report.merge(self.dispatch_due(now).await);
        report
    }

    /// Claim and publish up to `batch_size` due events
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let due = match self.store.find_due(now, self.batch_size()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to query due outbox events");
                report.errors += 1;
                return report;
            }
        };

        if due.is_empty() {
            return report;
        }

        let outcomes: Vec<(bool, Outcome)> = stream::iter(due)
            .map(|event| self.dispatch_one(event, now))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        for (claimed, outcome) in outcomes {
            if claimed {
                report.claimed += 1;
            }
            report.record(outcome);
        }
        report
    }

    /// Returns whether the event was claimed, and how it ended
    async fn dispatch_one(&self, event: OutboxEvent, now: DateTime<Utc>) -> (bool, Outcome) {
        let event_id = event.event_id;

        match self
            .store
            .mark_publishing(event_id, EventStatus::Pending, event.attempts, now)
            .await
        {
            Ok(Transition::Applied) => {}
            Ok(Transition::Conflict) => {
                debug!(event_id = %event_id, "Outbox event claimed by another worker, skipping");
                return (false, Outcome::Conflict);
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to claim outbox event");
                return (false, Outcome::Error);
            }
        }

        let subject = self.subject_for(&event.event_type);
        let envelope = EventEnvelope::new(event_id, event.event_type.clone(), &event.payload)
            .with_occurred_at(event.created_at);

        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("envelope serialization failed: {e}");
                return (true, self.record_failure(&event, &reason, true, now).await);
            }
        };

        let result = tokio::time::timeout(
            self.config.publish_timeout,
            self.bus.publish(&subject, &event_id.to_string(), bytes),
        )
        .await
        .unwrap_or(Err(BusError::Timeout(self.config.publish_timeout)));

        match result {
            Ok(()) => match self.store.mark_published(event_id, event.attempts, now).await {
                Ok(Transition::Applied) => {
                    debug!(
                        event_id = %event_id,
                        event_type = %event.event_type,
                        subject = %subject,
                        "Published outbox event"
                    );
                    (true, Outcome::Published)
                }
                Ok(Transition::Conflict) => {
                    // Reclaimed while the publish was in flight; it will be sent again.
                    warn!(event_id = %event_id, "Outbox event was reclaimed during publish");
                    (true, Outcome::Conflict)
                }
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "Failed to mark outbox event published");
                    (true, Outcome::Error)
                }
            },
            Err(e) => {
                let permanent = !e.is_transient();
                (true, self.record_failure(&event, &e.to_string(), permanent, now).await)
            }
        }
    }

    /// Count a failed attempt for an event currently in `publishing`.
    ///
    /// `event.attempts` is the count before the failed attempt, and fences
    /// the settle: if the event has been settled and claimed again since
    /// `event` was read, the store reports `Conflict` and nothing changes.
    pub(crate) async fn record_failure(
        &self,
        event: &OutboxEvent,
        reason: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Outcome {
        let event_id: Uuid = event.event_id;
        let attempts = event.attempts.saturating_add(1);
        let schedule = self.config.backoff.schedule(attempts, now);

        if permanent || schedule.dead {
            return match self.store.mark_dead(event_id, event.attempts, reason, now).await {
                Ok(Transition::Applied) => {
                    error!(
                        event_id = %event_id,
                        event_type = %event.event_type,
                        attempts,
                        permanent,
                        error = %reason,
                        "Outbox event is dead"
                    );
                    Outcome::Dead
                }
                Ok(Transition::Conflict) => Outcome::Conflict,
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "Failed to mark outbox event dead");
                    Outcome::Error
                }
            };
        }

        match self
            .store
            .mark_failed(event_id, event.attempts, schedule.next_attempt_at, reason, now)
            .await
        {
            Ok(Transition::Applied) => {
                warn!(
                    event_id = %event_id,
                    event_type = %event.event_type,
                    attempts,
                    next_attempt_at = %schedule.next_attempt_at,
                    error = %reason,
                    "Outbox publish failed, rescheduled"
                );
                Outcome::Retried
            }
            Ok(Transition::Conflict) => Outcome::Conflict,
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to reschedule outbox event");
                Outcome::Error
            }
        }
    }
}
