//! Per-route rate limit bucket
//!
//! A bucket holds the quota last reported for its route and a FIFO queue of
//! requests waiting for that quota. Only one drain task runs per bucket, so at most
//! one of its requests is in flight at a time.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{RestError, RestResult};
use crate::headers::RateLimitHeaders;
use crate::request::{RestRequest, RestResponse};
use crate::route::RouteData;

/// A queued request and the caller waiting for it
#[derive(Debug)]
pub struct PendingRequest {
    /// Log correlation id
    pub id: Uuid,
    pub route: RouteData,
    pub request: RestRequest,
    /// 429 responses seen so far
    pub rate_limit_attempts: u32,
    /// 5xx and transport failures seen so far
    pub error_attempts: u32,
    responder: oneshot::Sender<RestResult<RestResponse>>,
}

impl PendingRequest {
    pub fn new(
        route: RouteData,
        request: RestRequest,
    ) -> (Self, oneshot::Receiver<RestResult<RestResponse>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id: Uuid::new_v4(),
            route,
            request,
            rate_limit_attempts: 0,
            error_attempts: 0,
            responder: tx,
        };
        (pending, rx)
    }

    /// Complete the caller's future; a dropped caller is ignored
    pub fn respond(self, result: RestResult<RestResponse>) {
        let _ = self.responder.send(result);
    }
}

/// What the drain task should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Queue empty; the drain task exits
    Idle,
    /// Quota exhausted until the given instant
    Wait(Instant),
    /// Head of the queue may be sent
    Ready,
}

#[derive(Debug)]
struct BucketState {
    limit: Option<u32>,
    remaining: u32,
    reset_at: Option<Instant>,
    hash: Option<String>,
    queue: VecDeque<PendingRequest>,
    draining: bool,
}

/// Quota state and queue for one route signature
#[derive(Debug)]
pub struct RateLimitBucket {
    key: String,
    state: Mutex<BucketState>,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_at: Option<Instant>,
    pub hash: Option<String>,
    pub queued: usize,
}

impl RateLimitBucket {
    /// Create a bucket with unknown limit and one request allowed
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(BucketState {
                limit: None,
                remaining: 1,
                reset_at: None,
                hash: None,
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a request; returns true if the caller must start a drain task
    pub fn push(&self, pending: PendingRequest) -> bool {
        let mut state = self.state.lock();
        state.queue.push_back(pending);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Put a request back at the head of the queue (after a 429 or a retryable error)
    pub fn push_front(&self, pending: PendingRequest) {
        self.state.lock().queue.push_front(pending);
    }

    /// Decide whether the head of the queue may be sent at `now`
    ///
    /// Returning `Idle` also marks the bucket as not draining, atomically with the
    /// emptiness check, so a concurrent `push` starts a new drain task.
    pub fn poll_ready(&self, now: Instant) -> Readiness {
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            state.draining = false;
            return Readiness::Idle;
        }
        match state.reset_at {
            Some(reset_at) if state.remaining == 0 && now < reset_at => Readiness::Wait(reset_at),
            _ => Readiness::Ready,
        }
    }

    /// Dequeue the head and consume one unit of quota
    ///
    /// Refills the quota first if the reset window has elapsed. Returns `None` when the
    /// queue is empty or the quota is still exhausted.
    pub fn take(&self, now: Instant) -> Option<PendingRequest> {
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            return None;
        }

        if state.remaining == 0 {
            if state.reset_at.is_some_and(|reset_at| now < reset_at) {
                return None;
            }
            state.remaining = state.limit.unwrap_or(1).max(1);
            state.reset_at = None;
        }

        let pending = state.queue.pop_front()?;
        state.remaining -= 1;
        Some(pending)
    }

    /// Overwrite quota state from response headers
    pub fn update(&self, headers: &RateLimitHeaders, now: Instant, offset: Duration) {
        let mut state = self.state.lock();

        if let Some(limit) = headers.limit {
            state.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            state.remaining = remaining;
        }
        if let Some(reset_after) = headers.reset_after {
            state.reset_at = Some(now + reset_after + offset);
        }
        if let Some(hash) = &headers.bucket {
            if state.hash.as_deref() != Some(hash.as_str()) {
                tracing::trace!(route = %self.key, bucket = %hash, "Bucket hash observed");
                state.hash = Some(hash.clone());
            }
        }
    }

    /// Block the bucket until `now + retry_after` after a 429
    pub fn lockout(&self, retry_after: Duration, now: Instant) {
        let mut state = self.state.lock();
        state.remaining = 0;
        state.reset_at = Some(now + retry_after);
    }

    /// Fail every queued request and stop draining
    pub fn fail_all(&self, error: impl Fn() -> RestError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.draining = false;
            state.queue.drain(..).collect()
        };
        let count = drained.len();
        for pending in drained {
            pending.respond(Err(error()));
        }
        count
    }

    #[must_use]
    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
            hash: state.hash.clone(),
            queued: state.queue.len(),
        }
    }
}
