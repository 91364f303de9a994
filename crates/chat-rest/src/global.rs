//! Global request throttle shared by every bucket

use parking_lot::Mutex as SyncMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{RestError, RestResult};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    started_at: Instant,
    used: u32,
}

/// Requests-per-second ceiling plus the lock set by a global 429
///
/// `acquire` is serialized through an async mutex held across its waits, so callers
/// are released one at a time in arrival order.
#[derive(Debug)]
pub struct GlobalThrottle {
    requests_per_second: u32,
    window: Mutex<Window>,
    locked_until: SyncMutex<Option<Instant>>,
}

impl GlobalThrottle {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second: requests_per_second.max(1),
            window: Mutex::new(Window {
                started_at: Instant::now(),
                used: 0,
            }),
            locked_until: SyncMutex::new(None),
        }
    }

    /// Wait until one request may be sent
    pub async fn acquire(&self, cancel: &CancellationToken) -> RestResult<()> {
        let mut window = tokio::select! {
            guard = self.window.lock() => guard,
            () = cancel.cancelled() => return Err(RestError::Shutdown),
        };

        loop {
            let now = Instant::now();

            if let Some(until) = self.locked_until() {
                if now < until {
                    tracing::debug!(wait_ms = (until - now).as_millis() as u64, "Globally rate limited");
                    wait_until(until, cancel).await?;
                    continue;
                }
            }

            if now >= window.started_at + WINDOW {
                window.started_at = now;
                window.used = 0;
            }

            if window.used < self.requests_per_second {
                window.used += 1;
                return Ok(());
            }

            wait_until(window.started_at + WINDOW, cancel).await?;
        }
    }

    /// Lock every bucket for `duration` after a global 429
    pub fn lock_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut locked = self.locked_until.lock();
        if locked.is_none_or(|current| current < until) {
            *locked = Some(until);
        }
        tracing::warn!(retry_after_ms = duration.as_millis() as u64, "Global rate limit hit");
    }

    /// Instant the global lock expires, if one is set
    #[must_use]
    pub fn locked_until(&self) -> Option<Instant> {
        *self.locked_until.lock()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_until()
            .is_some_and(|until| Instant::now() < until)
    }
}

async fn wait_until(deadline: Instant, cancel: &CancellationToken) -> RestResult<()> {
    tokio::select! {
        () = sleep_until(deadline) => Ok(()),
        () = cancel.cancelled() => Err(RestError::Shutdown),
    }
}
