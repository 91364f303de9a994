//! Error classification shared by every crate
//!
//! Each crate keeps its own `thiserror` enum and maps it onto one of these categories.
//! Shards and the dispatcher decide whether to recover or to propagate based on
//! the category alone.

use std::fmt;

/// Broad failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket or HTTP transport failure; reconnect or retry with backoff
    TransientNetwork,
    /// Session state no longer matches the remote; clear it and identify fresh
    ProtocolDesync,
    /// Remote quota exceeded and retries exhausted
    RateLimited,
    /// Token rejected by the remote
    Authentication,
    /// Sharding required or session start limit exhausted
    Capacity,
    /// Invalid local configuration (shard, version, intents)
    Configuration,
    /// Frame could not be decoded
    MalformedFrame,
    /// Non-retryable API error response
    Api,
    /// Operation abandoned because the client is shutting down
    Shutdown,
    /// Session store backend failure
    Storage,
}

impl ErrorCategory {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::ProtocolDesync => "PROTOCOL_DESYNC",
            Self::RateLimited => "RATE_LIMITED",
            Self::Authentication => "AUTHENTICATION",
            Self::Capacity => "CAPACITY",
            Self::Configuration => "CONFIGURATION",
            Self::MalformedFrame => "MALFORMED_FRAME",
            Self::Api => "API",
            Self::Shutdown => "SHUTDOWN",
            Self::Storage => "STORAGE",
        }
    }

    /// Fatal categories stop the shard (or client) instead of being recovered
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Capacity | Self::Configuration
        )
    }

    /// Whether retrying the same operation can succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::ProtocolDesync | Self::RateLimited | Self::Storage
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
