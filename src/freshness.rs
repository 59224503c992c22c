use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::meter_reading::SourceStatus;

/// How long the Modbus side keeps serving after the last accepted reading.
pub const OFFLINE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Derives availability from the acquisition status and the shared clock.
#[derive(Clone)]
pub struct FreshnessTracker {
    clock: Arc<dyn Clock>,
    offline_timeout: Duration,
}

impl FreshnessTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(clock, OFFLINE_TIMEOUT)
    }

    pub fn with_timeout(clock: Arc<dyn Clock>, offline_timeout: Duration) -> Self {
        Self {
            clock,
            offline_timeout,
        }
    }

    /// The acquisition cycle only reports online right after a success, so
    /// the flag alone decides.
    pub fn classify(status: &SourceStatus) -> Freshness {
        if status.online {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// Age of the last accepted reading, `None` before the first one.
    pub fn staleness(&self, status: &SourceStatus) -> Option<Duration> {
        let last = status.last_success_at?;
        Some(Duration::from_millis(
            self.clock.now_millis().saturating_sub(last),
        ))
    }

    /// True while the last success is at most the offline timeout old,
    /// boundary included.
    pub fn has_recent_success(&self, status: &SourceStatus) -> bool {
        self.staleness(status)
            .is_some_and(|age| age <= self.offline_timeout)
    }
}
