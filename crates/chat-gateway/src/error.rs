//! Gateway error types

use chat_cache::SessionStoreError;
use chat_common::ErrorCategory;
use chat_rest::RestError;
use std::time::Duration;
use thiserror::Error;

use crate::codec::CodecError;
use crate::protocol::{describe, Recovery};

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The server closed the socket with a code the shard cannot recover from
    #[error("Gateway closed the connection with {code}: {reason}")]
    Closed { code: u16, reason: &'static str },

    #[error("Session start limit reached: {remaining} remaining, {required} required, resets in {reset_after:?}")]
    SessionStartLimit {
        remaining: u32,
        required: usize,
        reset_after: Duration,
    },

    #[error("Shard {shard_id} is out of range for {shard_count} shards")]
    InvalidShard { shard_id: u32, shard_count: u32 },

    #[error("Unknown shard {0}")]
    UnknownShard(u32),

    #[error("Shard {0} is not running")]
    ShardClosed(u32),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Session(#[from] SessionStoreError),

    #[error("Gateway is shut down")]
    Shutdown,
}

impl GatewayError {
    /// Error for a close code whose recovery is fatal
    #[must_use]
    pub fn closed(code: u16) -> Self {
        Self::Closed {
            code,
            reason: describe(code),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::WebSocket(_) => ErrorCategory::TransientNetwork,
            Self::Codec(e) => e.category(),
            Self::Closed { code, .. } => match Recovery::for_code(*code) {
                Recovery::Fatal(category) => category,
                Recovery::Resume => ErrorCategory::TransientNetwork,
                Recovery::Identify => ErrorCategory::ProtocolDesync,
            },
            Self::SessionStartLimit { .. } => ErrorCategory::Capacity,
            Self::InvalidShard { .. } | Self::UnknownShard(_) | Self::InvalidUrl(_) => {
                ErrorCategory::Configuration
            }
            Self::ShardClosed(_) | Self::Shutdown => ErrorCategory::Shutdown,
            Self::Rest(e) => e.category(),
            Self::Session(e) => e.category(),
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
