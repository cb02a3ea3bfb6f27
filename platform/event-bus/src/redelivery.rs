//! Delay between broker redeliveries of a nacked message
//!
//! Consumers never retry in-process; a failed message is nacked and the
//! broker sends it again. The delay requested with the nak grows with the
//! delivery count so a downstream outage is not hammered.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryBackoff {
    /// Delay after the first failed delivery (doubles on each redelivery)
    pub initial_backoff: Duration,
    /// Upper bound on the delay
    pub max_backoff: Duration,
}

impl Default for RedeliveryBackoff {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RedeliveryBackoff {
    /// Delay to request when nacking a message delivered `delivered` times
    /// (1 on the first delivery)
    pub fn delay_for(&self, delivered: u64) -> Duration {
        let exponent = u32::try_from(delivered.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
