//! Rate-limited request dispatcher
//!
//! Every request is routed to the bucket of its route signature. A bucket is drained
//! by one spawned task at a time, strictly FIFO, so requests on one route run in
//! enqueue order while different routes run concurrently. Every send first passes
//! the shared `GlobalThrottle`.

use chat_common::{BotToken, RestConfig};
use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::bucket::{BucketSnapshot, PendingRequest, RateLimitBucket, Readiness};
use crate::error::{RestError, RestResult};
use crate::global::GlobalThrottle;
use crate::headers::{ApiErrorBody, RateLimitHeaders, RateLimitedBody};
use crate::invalid::InvalidRequestCounter;
use crate::request::{HttpRequest, RestRequest, RestResponse};
use crate::route::RouteData;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Fallback wait when a 429 carries no usable delay
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper bound for the 5xx/transport retry backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Shared handle to the dispatcher; cheap to clone
#[derive(Clone)]
pub struct RateLimitedDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: RestConfig,
    api_url: String,
    user_agent: String,
    token: Option<BotToken>,
    transport: Arc<dyn HttpTransport>,
    buckets: DashMap<String, Arc<RateLimitBucket>>,
    global: GlobalThrottle,
    invalid: InvalidRequestCounter,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RateLimitedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedDispatcher")
            .field("api_url", &self.inner.api_url)
            .field("buckets", &self.inner.buckets.len())
            .field("shutdown", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl RateLimitedDispatcher {
    /// Create a dispatcher sending over HTTP with the bot token
    pub fn new(config: RestConfig, token: BotToken) -> RestResult<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config, Some(token), transport))
    }

    /// Create a dispatcher over a custom transport
    pub fn with_transport(
        config: RestConfig,
        token: Option<BotToken>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let api_url = config.api_url();
        let user_agent = format!(
            "DiscordBot ({}, {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );

        tracing::info!(
            api_url = %api_url,
            global_requests_per_second = config.global_requests_per_second,
            "REST dispatcher created"
        );

        Self {
            inner: Arc::new(DispatcherInner {
                global: GlobalThrottle::new(config.global_requests_per_second),
                invalid: InvalidRequestCounter::new(config.invalid_request_warning_interval),
                api_url,
                user_agent,
                token,
                transport,
                buckets: DashMap::new(),
                cancel: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Queue a request on its route bucket and wait for the response
    ///
    /// Resolves with the final response, or the last error once retries are exhausted.
    pub async fn enqueue(&self, request: RestRequest) -> RestResult<RestResponse> {
        if self.inner.cancel.is_cancelled() {
            return Err(RestError::Shutdown);
        }

        let route = RouteData::new(request.method, &request.path);
        let key = route.key();
        let bucket = self
            .inner
            .buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RateLimitBucket::new(key.clone())))
            .value()
            .clone();

        let (pending, rx) = PendingRequest::new(route, request);
        tracing::trace!(request_id = %pending.id, route = %key, "Request queued");

        if bucket.push(pending) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.drain(bucket));
        }

        rx.await.map_err(|_| RestError::Shutdown)?
    }

    /// Quota state of a route's bucket, if the route has been used
    #[must_use]
    pub fn bucket_snapshot(&self, route: &RouteData) -> Option<BucketSnapshot> {
        self.inner
            .buckets
            .get(&route.key())
            .map(|bucket| bucket.snapshot())
    }

    #[must_use]
    pub fn global(&self) -> &GlobalThrottle {
        &self.inner.global
    }

    /// 401/403/429 responses in the current ten minute window
    #[must_use]
    pub fn invalid_request_count(&self) -> u32 {
        self.inner.invalid.count()
    }

    #[must_use]
    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    /// Fail queued requests and refuse new ones; in-flight requests complete
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::info!(buckets = self.inner.buckets.len(), "REST dispatcher shutting down");
            self.inner.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl DispatcherInner {
    async fn drain(self: Arc<Self>, bucket: Arc<RateLimitBucket>) {
        loop {
            if self.cancel.is_cancelled() {
                let failed = bucket.fail_all(|| RestError::Shutdown);
                if failed > 0 {
                    tracing::debug!(route = %bucket.key(), failed, "Failed queued requests on shutdown");
                }
                return;
            }

            match bucket.poll_ready(Instant::now()) {
                Readiness::Idle => return,
                Readiness::Wait(until) => {
                    tracing::debug!(
                        route = %bucket.key(),
                        wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Bucket exhausted, waiting for reset"
                    );
                    tokio::select! {
                        () = sleep_until(until) => {}
                        () = self.cancel.cancelled() => {}
                    }
                    continue;
                }
                Readiness::Ready => {}
            }

            if self.global.acquire(&self.cancel).await.is_err() {
                continue;
            }

            let Some(pending) = bucket.take(Instant::now()) else {
                continue;
            };
            self.execute(&bucket, pending).await;
        }
    }

    async fn execute(&self, bucket: &RateLimitBucket, pending: PendingRequest) {
        let route = pending.route.key();
        let http = self.build_request(&pending.request);

        tracing::debug!(
            request_id = %pending.id,
            route = %route,
            rate_limit_attempts = pending.rate_limit_attempts,
            error_attempts = pending.error_attempts,
            "Sending request"
        );

        let result = match tokio::time::timeout(self.config.timeout, self.transport.execute(http)).await
        {
            Ok(result) => result,
            Err(_) => Err(RestError::Timeout(self.config.timeout)),
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.retry_or_fail(bucket, pending, err).await;
                return;
            }
        };

        let now = Instant::now();
        let headers = RateLimitHeaders::from_response(&response);
        bucket.update(&headers, now, self.config.offset);
        self.invalid.record(response.status, &route);

        match response.status {
            429 => self.handle_rate_limited(bucket, pending, &response, &headers, now),
            401 => {
                tracing::error!(request_id = %pending.id, route = %route, "Token rejected");
                pending.respond(Err(RestError::Unauthorized));
            }
            status @ 500..=599 => {
                let err = RestError::Server { status, route };
                self.retry_or_fail(bucket, pending, err).await;
            }
            status @ 400..=499 => {
                let body: ApiErrorBody = response.json().unwrap_or_default();
                let message = body.message.unwrap_or_else(|| response.text());
                tracing::debug!(request_id = %pending.id, route = %route, status, code = ?body.code, "API error");
                pending.respond(Err(RestError::Api {
                    status,
                    code: body.code,
                    message,
                    route,
                }));
            }
            _ => pending.respond(Ok(response)),
        }
    }

    fn handle_rate_limited(
        &self,
        bucket: &RateLimitBucket,
        mut pending: PendingRequest,
        response: &RestResponse,
        headers: &RateLimitHeaders,
        now: Instant,
    ) {
        let body = response.json::<RateLimitedBody>().ok();
        let retry_after = body
            .as_ref()
            .and_then(RateLimitedBody::retry_after)
            .or(headers.retry_after)
            .or(headers.reset_after)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let global = body.as_ref().is_some_and(|b| b.global) || headers.is_global();

        if global {
            self.global.lock_for(retry_after);
        }
        bucket.lockout(retry_after + self.config.offset, now);

        let route = pending.route.key();
        tracing::warn!(
            request_id = %pending.id,
            route = %route,
            retry_after_ms = retry_after.as_millis() as u64,
            global,
            scope = ?headers.scope,
            attempt = pending.rate_limit_attempts + 1,
            "Rate limited"
        );

        if pending.rate_limit_attempts >= self.config.rate_limit_retries {
            pending.respond(Err(RestError::RateLimitExhausted { route, retry_after }));
        } else {
            pending.rate_limit_attempts += 1;
            bucket.push_front(pending);
        }
    }

    async fn retry_or_fail(&self, bucket: &RateLimitBucket, mut pending: PendingRequest, err: RestError) {
        if !err.is_retryable() || pending.error_attempts >= self.config.retries {
            tracing::warn!(request_id = %pending.id, route = %pending.route, error = %err, "Request failed");
            pending.respond(Err(err));
            return;
        }

        pending.error_attempts += 1;
        let delay = retry_backoff(pending.error_attempts);
        tracing::warn!(
            request_id = %pending.id,
            route = %pending.route,
            error = %err,
            attempt = pending.error_attempts,
            delay_ms = delay.as_millis() as u64,
            "Request failed, retrying"
        );

        tokio::select! {
            () = sleep(delay) => bucket.push_front(pending),
            () = self.cancel.cancelled() => pending.respond(Err(RestError::Shutdown)),
        }
    }

    fn build_request(&self, request: &RestRequest) -> HttpRequest {
        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];

        if request.auth {
            if let Some(token) = &self.token {
                headers.push(("Authorization".to_string(), token.authorization_header()));
            }
        }
        if let Some(reason) = &request.reason {
            headers.push(("X-Audit-Log-Reason".to_string(), encode_reason(reason)));
        }

        HttpRequest {
            method: request.method,
            url: format!("{}{}", self.api_url, request.path),
            query: request.query.clone(),
            headers,
            body: request.body.clone(),
            timeout: self.config.timeout,
        }
    }
}

/// 500ms, 1s, 2s, ... capped at `MAX_RETRY_BACKOFF`
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    (Duration::from_millis(500) * factor).min(MAX_RETRY_BACKOFF)
}

/// Percent-encode an audit log reason for use as a header value
fn encode_reason(reason: &str) -> String {
    let mut encoded = String::with_capacity(reason.len());
    for byte in reason.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}
