//! Session storage module.
//!
//! Stores the resumable identity (session id, sequence, resume URL) of each shard:
//! - In memory, for single-process clients
//! - In Redis, so a restarted process can resume its shards

mod memory;
mod redis_store;
mod shard_session;

use std::sync::Arc;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use shard_session::{SessionResult, SessionStore, SessionStoreError, ShardSession};

use crate::pool::{RedisPool, RedisPoolConfig};

/// Build the session store selected by configuration
///
/// Redis when `SESSION_REDIS_URL` is configured, memory otherwise.
pub fn session_store_from_config(
    config: &chat_common::SessionConfig,
    namespace: &str,
) -> SessionResult<Arc<dyn SessionStore>> {
    match RedisPoolConfig::from_session_config(config) {
        Some(pool_config) => {
            let pool = RedisPool::new(pool_config)?;
            Ok(Arc::new(RedisSessionStore::new(pool, namespace)))
        }
        None => {
            tracing::debug!("No session Redis configured, keeping sessions in memory");
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}
