//! REST error types

use chat_common::ErrorCategory;
use std::time::Duration;

/// Errors returned by the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unauthorized: the token was rejected")]
    Unauthorized,

    #[error("Rate limited on {route}; retries exhausted (last retry_after {retry_after:?})")]
    RateLimitExhausted { route: String, retry_after: Duration },

    #[error("API error {status} on {route}: {message}")]
    Api {
        status: u16,
        code: Option<u64>,
        message: String,
        route: String,
    },

    #[error("Server error {status} on {route}")]
    Server { status: u16, route: String },

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Dispatcher is shut down")]
    Shutdown,
}

impl RestError {
    /// Map onto the shared error category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Server { .. } => {
                ErrorCategory::TransientNetwork
            }
            Self::Unauthorized => ErrorCategory::Authentication,
            Self::RateLimitExhausted { .. } => ErrorCategory::RateLimited,
            Self::Api { .. } | Self::Decode(_) => ErrorCategory::Api,
            Self::Shutdown => ErrorCategory::Shutdown,
        }
    }

    /// Whether the dispatcher may retry the request after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Server { .. }
        )
    }
}

/// Result type alias for REST operations
pub type RestResult<T> = Result<T, RestError>;
