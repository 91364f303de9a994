//! Invalid request accounting
//!
//! The platform bans clients that send too many 401/403/429 responses in a rolling
//! ten minute window. The counter only observes and warns.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Counter {
    window_start: Instant,
    count: u32,
}

/// Rolling counter of invalid responses
#[derive(Debug)]
pub struct InvalidRequestCounter {
    warning_interval: u32,
    counter: Mutex<Counter>,
}

impl InvalidRequestCounter {
    /// `warning_interval` of 0 disables warnings
    pub fn new(warning_interval: u32) -> Self {
        Self {
            warning_interval,
            counter: Mutex::new(Counter {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Whether a status counts as invalid
    #[must_use]
    pub fn is_invalid(status: u16) -> bool {
        matches!(status, 401 | 403 | 429)
    }

    /// Record a response status; returns the count in the current window
    pub fn record(&self, status: u16, route: &str) -> u32 {
        if !Self::is_invalid(status) {
            return self.count();
        }

        let now = Instant::now();
        let mut counter = self.counter.lock();
        if now >= counter.window_start + WINDOW {
            counter.window_start = now;
            counter.count = 0;
        }
        counter.count += 1;
        let count = counter.count;
        drop(counter);

        if self.warning_interval > 0 && count % self.warning_interval == 0 {
            tracing::warn!(
                count,
                status,
                route = %route,
                "Invalid requests in the last 10 minutes"
            );
        }
        count
    }

    /// Count in the current window
    #[must_use]
    pub fn count(&self) -> u32 {
        let counter = self.counter.lock();
        if Instant::now() >= counter.window_start + WINDOW {
            0
        } else {
            counter.count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_only_invalid_statuses() {
        let counter = InvalidRequestCounter::new(0);
        assert_eq!(counter.record(200, "GET:/x:"), 0);
        assert_eq!(counter.record(404, "GET:/x:"), 0);
        assert_eq!(counter.record(401, "GET:/x:"), 1);
        assert_eq!(counter.record(403, "GET:/x:"), 2);
        assert_eq!(counter.record(429, "GET:/x:"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls_over() {
        let counter = InvalidRequestCounter::new(2);
        counter.record(429, "GET:/x:");
        counter.record(429, "GET:/x:");
        assert_eq!(counter.count(), 2);

        tokio::time::advance(WINDOW).await;
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.record(401, "GET:/x:"), 1);
    }
}
