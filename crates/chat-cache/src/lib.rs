//! # chat-cache
//!
//! Storage for resumable gateway sessions.
//!
//! ## Features
//!
//! - **Session Store**: `SessionStore` trait with in-memory and Redis implementations
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::{MemorySessionStore, SessionStore, ShardSession};
//!
//! let store = MemorySessionStore::new();
//! store.set(&ShardSession::new(0, 1).with_session("abc", None)).await?;
//! store.update_sequence(0, 42).await?;
//! ```

pub mod pool;
pub mod session;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export session types
pub use session::{
    session_store_from_config, MemorySessionStore, RedisSessionStore, SessionResult,
    SessionStore, SessionStoreError, ShardSession,
};
