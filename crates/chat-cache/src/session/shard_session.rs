//! Resumable shard session state and the store trait.

use async_trait::async_trait;
use chat_common::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pool::RedisPoolError;

/// Resumable identity of one shard's gateway session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSession {
    pub shard_id: u32,
    /// Shard count the session was identified with
    pub shard_count: u32,
    /// Set by READY; `None` until the shard has identified
    pub session_id: Option<String>,
    /// Last dispatch sequence received
    pub sequence: Option<u64>,
    /// `resume_gateway_url` from READY
    pub resume_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ShardSession {
    /// Create an empty (not yet identified) session
    #[must_use]
    pub fn new(shard_id: u32, shard_count: u32) -> Self {
        Self {
            shard_id,
            shard_count,
            session_id: None,
            sequence: None,
            resume_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Set the session id and resume URL from READY
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>, resume_url: Option<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.resume_url = resume_url;
        self
    }

    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Whether the session may be resumed by a shard running with `shard_count` shards
    #[must_use]
    pub fn is_resumable(&self, shard_count: u32) -> bool {
        self.session_id.is_some() && self.shard_count == shard_count
    }

    /// Apply a sequence number if it is greater than the stored one
    pub fn advance_sequence(&mut self, sequence: u64) -> bool {
        if self.sequence.is_some_and(|current| current >= sequence) {
            return false;
        }
        self.sequence = Some(sequence);
        self.updated_at = Utc::now();
        true
    }
}

/// Session store errors
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisPoolError),

    #[error("Stored session for shard {shard_id} is corrupt: {reason}")]
    Corrupt { shard_id: u32, reason: String },
}

impl SessionStoreError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl From<redis::RedisError> for SessionStoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(RedisPoolError::Redis(err))
    }
}

/// Result type for session store operations
pub type SessionResult<T> = Result<T, SessionStoreError>;

/// Storage for resumable shard sessions
///
/// Implementations must never let a stored sequence decrease.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for a shard
    async fn get(&self, shard_id: u32) -> SessionResult<Option<ShardSession>>;

    /// Replace the session for a shard
    async fn set(&self, session: &ShardSession) -> SessionResult<()>;

    /// Store `sequence` if it is greater than the current one.
    ///
    /// Returns `false` when the shard has no session or the sequence is not newer.
    async fn update_sequence(&self, shard_id: u32, sequence: u64) -> SessionResult<bool>;

    /// Forget the session so the next connect identifies fresh
    async fn clear(&self, shard_id: u32) -> SessionResult<()>;
}
