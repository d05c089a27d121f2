// Minimum-interval throttle for fetches on one model
//
// A local throttle on *starting* requests: it never times out a request in
// flight. Uses tokio's clock so paused-time tests stay deterministic.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks when the last fetch started on a model.
#[derive(Debug, Clone)]
pub struct FetchThrottle {
    min_interval: Duration,
    last_started: Option<Instant>,
}

impl FetchThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_started: None,
        }
    }

    /// Try to start a fetch at `now`.
    ///
    /// Returns false, recording nothing, if the previous start was less than
    /// `min_interval` ago. Otherwise records `now` and returns true.
    pub fn try_start(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_started {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_started = Some(now);
        true
    }

    /// Record a start unconditionally.
    pub fn mark(&mut self, now: Instant) {
        self.last_started = Some(now);
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
