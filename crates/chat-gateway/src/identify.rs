//! Identify gate
//!
//! IDENTIFYs share a per-bot budget: within one concurrency bucket
//! (`shard_id % max_concurrency`) consecutive IDENTIFYs are spaced by at least
//! the identify interval. RESUMEs do not pass through the gate.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug)]
pub struct IdentifyGate {
    interval: Duration,
    buckets: Vec<Mutex<Option<Instant>>>,
}

impl IdentifyGate {
    #[must_use]
    pub fn new(interval: Duration, max_concurrency: u32) -> Self {
        let max_concurrency = max_concurrency.max(1) as usize;
        Self {
            interval,
            buckets: (0..max_concurrency).map(|_| Mutex::new(None)).collect(),
        }
    }

    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.buckets.len() as u32
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Concurrency bucket a shard identifies in
    #[must_use]
    pub fn bucket_for(&self, shard_id: u32) -> usize {
        shard_id as usize % self.buckets.len()
    }

    /// Wait for this shard's turn to IDENTIFY
    ///
    /// Waiters in one bucket are served in arrival order. Returns `Shutdown`
    /// if `cancel` fires first; the slot is then left untouched.
    pub async fn acquire(&self, shard_id: u32, cancel: &CancellationToken) -> GatewayResult<()> {
        let bucket = self.bucket_for(shard_id);

        let mut last = tokio::select! {
            guard = self.buckets[bucket].lock() => guard,
            () = cancel.cancelled() => return Err(GatewayError::Shutdown),
        };

        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tracing::debug!(
                    shard_id,
                    bucket,
                    wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Waiting for identify slot"
                );
                tokio::select! {
                    () = sleep_until(ready_at) => {}
                    () = cancel.cancelled() => return Err(GatewayError::Shutdown),
                }
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }
}
