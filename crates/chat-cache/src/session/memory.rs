//! In-process session store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::shard_session::{SessionResult, SessionStore, ShardSession};

/// Session store backed by a concurrent map; sessions do not survive a restart
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<u32, ShardSession>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, shard_id: u32) -> SessionResult<Option<ShardSession>> {
        Ok(self.sessions.get(&shard_id).map(|s| s.clone()))
    }

    async fn set(&self, session: &ShardSession) -> SessionResult<()> {
        self.sessions.insert(session.shard_id, session.clone());
        Ok(())
    }

    async fn update_sequence(&self, shard_id: u32, sequence: u64) -> SessionResult<bool> {
        Ok(self
            .sessions
            .get_mut(&shard_id)
            .is_some_and(|mut session| session.advance_sequence(sequence)))
    }

    async fn clear(&self, shard_id: u32) -> SessionResult<()> {
        self.sessions.remove(&shard_id);
        Ok(())
    }
}
