//! Stuck-event reclaimer
//!
//! A dispatcher that dies between claiming an event and settling it leaves
//! the row in `publishing`. Rows that have not been updated for
//! `reclaim_after` are treated as a failed attempt and go through the same
//! backoff path as an explicit publish failure.

use crate::dispatcher::{DispatchReport, Dispatcher};
use chrono::{DateTime, Utc};
use tracing::{error, warn};

impl Dispatcher {
    /// Route abandoned `publishing` events back through the failure path
    pub async fn reclaim_stuck(&self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let Some(cutoff) = chrono::Duration::from_std(self.config.reclaim_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            // Nothing can have been publishing for that long
            return report;
        };

        let stuck = match self.store.find_stuck(cutoff, self.batch_size()).await {
            Ok(stuck) => stuck,
            Err(e) => {
                error!(error = %e, "Failed to query stuck outbox events");
                report.errors += 1;
                return report;
            }
        };

        for event in stuck {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                publishing_since = %event.updated_at,
                "Reclaiming outbox event stuck in publishing"
            );

            let reason = format!(
                "publish did not complete within {}s",
                self.config.reclaim_after.as_secs()
            );
            let outcome = self.record_failure(&event, &reason, false, now).await;
            report.reclaimed += 1;
            report.record(outcome);
        }

        report
    }
}
