//! Rate limit response headers and bodies

use serde::Deserialize;
use std::time::Duration;

use crate::request::RestResponse;

/// Rate limit information carried by a response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    /// Opaque bucket hash; routes sharing a hash share a limit
    pub bucket: Option<String>,
    pub global: bool,
    /// `user`, `global` or `shared`
    pub scope: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn from_response(response: &RestResponse) -> Self {
        Self {
            limit: response
                .header("x-ratelimit-limit")
                .and_then(|v| v.trim().parse().ok()),
            remaining: response
                .header("x-ratelimit-remaining")
                .and_then(|v| v.trim().parse().ok()),
            reset_after: response
                .header("x-ratelimit-reset-after")
                .and_then(parse_seconds),
            bucket: response.header("x-ratelimit-bucket").map(str::to_string),
            global: response
                .header("x-ratelimit-global")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: response.header("x-ratelimit-scope").map(str::to_string),
            retry_after: response.header("retry-after").and_then(parse_seconds),
        }
    }

    /// Whether a 429 with these headers locks every route
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global || self.scope.as_deref() == Some("global")
    }
}

/// Body of a 429 response
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitedBody {
    /// Fractional seconds
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

impl RateLimitedBody {
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.retry_after).ok()
    }
}

/// Body of a non-429 error response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
