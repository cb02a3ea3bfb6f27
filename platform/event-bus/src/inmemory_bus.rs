//! In-memory implementation of the EventBus trait for testing and development

use crate::{Acknowledger, BusError, BusMessage, BusResult, Delivery, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// EventBus implementation using in-memory channels
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated message buses
///
/// Each consumer group owns one queue. Every subscriber of the group pulls
/// from that queue, so group members compete for messages the way JetStream
/// pull consumers do. A nacked delivery is put back on the group queue with
/// its delivery count incremented, after the delay the nak asked for.
///
/// Messages published while no group matches the subject are recorded in
/// [`InMemoryBus::published`] but delivered to nobody.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Join the group before publishing
/// let mut stream = bus.subscribe("test.events.>", "workers").await?;
///
/// bus.publish("test.events.created", "key-1", b"hello".to_vec()).await?;
///
/// let delivery = stream.next().await.unwrap()?;
/// assert_eq!(delivery.message.subject, "test.events.created");
/// assert_eq!(delivery.message.payload, b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    groups: HashMap<String, GroupQueue>,
    published: Vec<BusMessage>,
}

#[derive(Clone)]
struct GroupQueue {
    pattern: String,
    sender: mpsc::UnboundedSender<Queued>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued>>>,
    stats: Arc<GroupCounters>,
}

#[derive(Default)]
struct GroupCounters {
    acked: AtomicU64,
    nacked: AtomicU64,
    nak_delays: Mutex<Vec<Duration>>,
}

struct Queued {
    message: BusMessage,
    delivered: u64,
}

/// Settlement counters for one consumer group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub acked: u64,
    pub nacked: u64,
}

impl InMemoryBus {
    /// Create a new in-memory event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message accepted by `publish`, in publish order
    pub fn published(&self) -> Vec<BusMessage> {
        self.lock()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Ack/nak counters of a consumer group, if the group exists
    pub fn group_stats(&self, group: &str) -> Option<GroupStats> {
        let state = self.lock().ok()?;
        state.groups.get(group).map(|queue| GroupStats {
            acked: queue.stats.acked.load(Ordering::SeqCst),
            nacked: queue.stats.nacked.load(Ordering::SeqCst),
        })
    }

    /// Redelivery delays requested by naks in a consumer group, in nak order
    pub fn nak_delays(&self, group: &str) -> Vec<Duration> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        state
            .groups
            .get(group)
            .and_then(|queue| queue.stats.nak_delays.lock().ok().map(|d| d.clone()))
            .unwrap_or_default()
    }

    fn lock(&self) -> BusResult<MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| BusError::InternalError("in-memory bus state poisoned".to_string()))
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    ///
    /// # Examples
    /// - `quiz.events.>` matches `quiz.events.attempt.finalized`
    /// - `quiz.*.created` matches `quiz.user.created`
    /// - `quiz.events.*` does NOT match `quiz.events.attempt.finalized` (too many tokens)
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }

    fn validate_subject(subject: &str) -> BusResult<()> {
        if subject.is_empty() || subject.split('.').any(|t| t.is_empty()) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        if subject.contains('*') || subject.contains('>') || subject.contains(char::is_whitespace) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        Ok(())
    }
}

struct InMemoryAcker {
    message: BusMessage,
    delivered: u64,
    sender: mpsc::UnboundedSender<Queued>,
    stats: Arc<GroupCounters>,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nak(self: Box<Self>, delay: Duration) -> BusResult<()> {
        self.stats.nacked.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut delays) = self.stats.nak_delays.lock() {
            delays.push(delay);
        }

        let queued = Queued {
            message: self.message,
            delivered: self.delivered + 1,
        };

        if delay.is_zero() {
            return self
                .sender
                .send(queued)
                .map_err(|_| BusError::AckError("consumer group queue closed".to_string()));
        }

        let sender = self.sender;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The group queue lives as long as the bus
            let _ = sender.send(queued);
        });
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, key: &str, payload: Vec<u8>) -> BusResult<()> {
        Self::validate_subject(subject)?;

        let msg = BusMessage::new(subject.to_string(), payload).with_key(key);
        let mut state = self.lock()?;

        for queue in state.groups.values() {
            if Self::matches_pattern(subject, &queue.pattern) {
                // The group holds its own receiver, so the send cannot fail.
                let _ = queue.sender.send(Queued {
                    message: msg.clone(),
                    delivered: 1,
                });
            }
        }

        state.published.push(msg);
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        if pattern.is_empty() || group.is_empty() {
            return Err(BusError::InvalidSubject(format!("{pattern} / {group}")));
        }

        let queue = {
            let mut state = self.lock()?;
            let queue = state
                .groups
                .entry(group.to_string())
                .or_insert_with(|| {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    GroupQueue {
                        pattern: pattern.to_string(),
                        sender,
                        receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                        stats: Arc::new(GroupCounters::default()),
                    }
                })
                .clone();

            if queue.pattern != pattern {
                return Err(BusError::SubscribeError(format!(
                    "group {group} already subscribed to {}",
                    queue.pattern
                )));
            }
            queue
        };

        let stream = async_stream::stream! {
            loop {
                let next = {
                    let mut receiver = queue.receiver.lock().await;
                    receiver.recv().await
                };

                match next {
                    Some(queued) => {
                        let acker = InMemoryAcker {
                            message: queued.message.clone(),
                            delivered: queued.delivered,
                            sender: queue.sender.clone(),
                            stats: queue.stats.clone(),
                        };
                        yield Ok(Delivery::new(queued.message, queued.delivered, Box::new(acker)));
                    }
                    None => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
