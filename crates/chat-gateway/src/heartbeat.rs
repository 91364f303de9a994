//! Heartbeating
//!
//! `HeartbeatState` is the ack bookkeeping owned by the shard state machine.
//! `HeartbeatTimer` only produces ticks; what a tick means is decided by the machine.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Ack bookkeeping for one session
#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    interval: Option<Duration>,
    awaiting_ack: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin heartbeating at `interval` with nothing outstanding
    pub fn start(&mut self, interval: Duration) {
        self.interval = Some(interval);
        self.awaiting_ack = false;
        self.last_sent = None;
    }

    /// Forget everything; used when a socket goes away
    pub fn reset(&mut self) {
        *self = Self {
            latency: self.latency,
            ..Self::default()
        };
    }

    /// Record a heartbeat sent at `now`
    pub fn record_sent(&mut self, now: Instant) {
        self.awaiting_ack = true;
        self.last_sent = Some(now);
    }

    /// Record an ack; returns the round trip when a beat was outstanding
    pub fn record_ack(&mut self, now: Instant) -> Option<Duration> {
        if !self.awaiting_ack {
            return None;
        }
        self.awaiting_ack = false;
        let latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));
        if latency.is_some() {
            self.latency = latency;
        }
        latency
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Round trip of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// Restartable periodic timer
///
/// The first tick fires after `first_delay`, then every `interval`. Dropping the timer
/// stops it.
#[derive(Debug, Default)]
pub struct HeartbeatTimer {
    task: Option<JoinHandle<()>>,
}

impl HeartbeatTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start ticking; `on_tick` returning false stops the timer
    pub fn start<F>(&mut self, interval: Duration, first_delay: Duration, mut on_tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + first_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
    }

    /// Cancel all pending ticks
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
