//! Redis-backed session store.
//!
//! Each shard session is a hash at `gateway_session:{namespace}:{shard_id}` so that a
//! restarted process can resume its shards. Sequence updates run as a Lua script to
//! keep the compare-and-set atomic across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use super::shard_session::{SessionResult, SessionStore, SessionStoreError, ShardSession};
use crate::pool::RedisPool;

/// Key prefix for shard sessions
const SESSION_PREFIX: &str = "gateway_session:";

const UPDATE_SEQUENCE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
local current = tonumber(redis.call('HGET', KEYS[1], 'sequence'))
if current and current >= tonumber(ARGV[1]) then
    return 0
end
redis.call('HSET', KEYS[1], 'sequence', ARGV[1], 'updated_at', ARGV[2])
return 1
";

/// Redis session store
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: RedisPool,
    namespace: String,
    ttl: Option<Duration>,
    update_sequence: redis::Script,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisSessionStore {
    /// Create a store; `namespace` separates clients sharing one Redis
    #[must_use]
    pub fn new(pool: RedisPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            ttl: None,
            update_sequence: redis::Script::new(UPDATE_SEQUENCE_SCRIPT),
        }
    }

    /// Expire sessions that are not rewritten within `ttl`
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn session_key(&self, shard_id: u32) -> String {
        format!("{SESSION_PREFIX}{}:{shard_id}", self.namespace)
    }
}

fn to_fields(session: &ShardSession) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("shard_id", session.shard_id.to_string()),
        ("shard_count", session.shard_count.to_string()),
        ("updated_at", session.updated_at.to_rfc3339()),
    ];
    if let Some(session_id) = &session.session_id {
        fields.push(("session_id", session_id.clone()));
    }
    if let Some(sequence) = session.sequence {
        fields.push(("sequence", sequence.to_string()));
    }
    if let Some(resume_url) = &session.resume_url {
        fields.push(("resume_url", resume_url.clone()));
    }
    fields
}

fn from_fields(
    shard_id: u32,
    mut fields: HashMap<String, String>,
) -> Result<ShardSession, SessionStoreError> {
    let corrupt = |reason: String| SessionStoreError::Corrupt { shard_id, reason };

    let shard_count = fields
        .get("shard_count")
        .ok_or_else(|| corrupt("missing shard_count".to_string()))?
        .parse::<u32>()
        .map_err(|e| corrupt(format!("shard_count: {e}")))?;

    let sequence = fields
        .get("sequence")
        .map(|s| s.parse::<u64>())
        .transpose()
        .map_err(|e| corrupt(format!("sequence: {e}")))?;

    let updated_at = match fields.get("updated_at") {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| corrupt(format!("updated_at: {e}")))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    Ok(ShardSession {
        shard_id,
        shard_count,
        session_id: fields.remove("session_id"),
        sequence,
        resume_url: fields.remove("resume_url"),
        updated_at,
    })
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, shard_id: u32) -> SessionResult<Option<ShardSession>> {
        let key = self.session_key(shard_id);
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        from_fields(shard_id, fields).map(Some)
    }

    async fn set(&self, session: &ShardSession) -> SessionResult<()> {
        let key = self.session_key(session.shard_id);
        let fields = to_fields(session);
        let mut conn = self.pool.get().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore();
        if let Some(ttl) = self.ttl {
            pipe.expire(&key, ttl.as_secs() as i64).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        tracing::debug!(
            shard_id = session.shard_id,
            session_id = ?session.session_id,
            sequence = ?session.sequence,
            "Stored shard session"
        );
        Ok(())
    }

    async fn update_sequence(&self, shard_id: u32, sequence: u64) -> SessionResult<bool> {
        let key = self.session_key(shard_id);
        let mut conn = self.pool.get().await?;

        let updated: i32 = self
            .update_sequence
            .key(&key)
            .arg(sequence)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        Ok(updated == 1)
    }

    async fn clear(&self, shard_id: u32) -> SessionResult<()> {
        let key = self.session_key(shard_id);
        let mut conn = self.pool.get().await?;
        let _: i32 = conn.del(&key).await?;
        tracing::debug!(shard_id, "Cleared shard session");
        Ok(())
    }
}
