//! Retry scheduling for failed publishes
//!
//! Exponential backoff with a cap and an attempt budget. The schedule is a
//! pure function of the attempt count and the supplied clock reading, so the
//! same inputs always produce the same answer (no jitter).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit; attempt `n` waits `base * 2^n`
    pub base: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_interval: Duration,
    /// Attempts allowed before the event is declared dead
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_interval: Duration::from_secs(5 * 60),
            max_attempts: 5,
        }
    }
}

/// Result of scheduling a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// When the event becomes due again (meaningless when `dead`)
    pub next_attempt_at: DateTime<Utc>,
    /// The attempt budget is exhausted
    pub dead: bool,
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the number of attempts made so far
    ///
    /// Saturates at `max_interval`, including when `2^attempts` overflows.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Schedule the next attempt.
    ///
    /// `attempts` is the post-increment count, i.e. it already includes the
    /// attempt that just failed.
    pub fn schedule(&self, attempts: u32, now: DateTime<Utc>) -> Schedule {
        let dead = attempts > self.max_attempts;
        let delay = chrono::Duration::from_std(self.delay(attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));

        Schedule {
            next_attempt_at: now.checked_add_signed(delay).unwrap_or(now),
            dead,
        }
    }
}
