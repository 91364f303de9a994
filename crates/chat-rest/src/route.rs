//! Route signatures
//!
//! Requests share a rate limit bucket when they share a route signature: the method,
//! the path with every id generalized, and the major parameter (the first channel,
//! guild or webhook id) kept literally.

use chat_core::Snowflake;
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::request::Method;

/// Path segments whose following id is a major parameter
const MAJOR_PARAMETERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Messages older than this are deleted under a separate limit
const OLD_MESSAGE_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Route signature of one request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteData {
    pub method: Method,
    /// Normalized path, e.g. `/channels/:id/messages/:id`
    pub bucket_route: String,
    /// Literal major parameter, empty when the route has none
    pub major_parameter: String,
}

impl RouteData {
    /// Derive the route of a request path
    pub fn new(method: Method, path: &str) -> Self {
        Self::new_at(method, path, SystemTime::now())
    }

    /// Derive the route, judging message age against `now`
    pub fn new_at(method: Method, path: &str, now: SystemTime) -> Self {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut major_parameter = String::new();
        let mut normalized = Vec::with_capacity(segments.len());

        for (i, segment) in segments.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| segments[p]);

            if previous == Some("reactions") {
                // Emoji and user segments all share one bucket
                normalized.push(":reaction");
                break;
            }

            if is_id(segment) {
                if major_parameter.is_empty()
                    && previous.is_some_and(|p| MAJOR_PARAMETERS.contains(&p))
                {
                    major_parameter = (*segment).to_string();
                }
                normalized.push(":id");
            } else if i >= 2 && segments[i - 2] == "webhooks" && previous.is_some_and(is_id) {
                // Webhook token
                normalized.push(":token");
            } else {
                normalized.push(*segment);
            }
        }

        let mut bucket_route = format!("/{}", normalized.join("/"));

        if method == Method::Delete
            && normalized.len() == 4
            && normalized[..3] == ["channels", ":id", "messages"]
            && normalized[3] == ":id"
        {
            let is_old = Snowflake::parse(segments[3])
                .map(|id| id.age_at(now) > OLD_MESSAGE_AGE)
                .unwrap_or(false);
            if is_old {
                bucket_route.push_str("/old-message");
            }
        }

        Self {
            method,
            bucket_route,
            major_parameter,
        }
    }

    /// Bucket map key
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.method, self.bucket_route, self.major_parameter
        )
    }
}

impl fmt::Display for RouteData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
