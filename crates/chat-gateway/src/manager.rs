//! Shard manager
//!
//! Spawns one `GatewayConnection` per shard, shares the identify gate between them
//! and merges their events into one stream.

use chat_cache::{MemorySessionStore, SessionStore};
use chat_common::{BotToken, ErrorCategory, GatewayConfig};
use chat_core::Collection;
use chat_rest::{GatewayBot, RateLimitedDispatcher};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffConfig;
use crate::config::ShardConfig;
use crate::connection::{GatewayConnection, ShardContext, ShardHandle};
use crate::error::{GatewayError, GatewayResult};
use crate::events::ShardEvent;
use crate::identify::IdentifyGate;
use crate::machine::ShardState;
use crate::protocol::{GatewayCommand, UpdatePresence};

type ShardTask = JoinHandle<GatewayResult<()>>;

/// Options for starting a `ShardManager`
#[derive(Clone)]
pub struct ShardManagerBuilder {
    config: GatewayConfig,
    token: BotToken,
    store: Option<Arc<dyn SessionStore>>,
    presence: Option<UpdatePresence>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ShardManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManagerBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("presence", &self.presence)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl ShardManagerBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig, token: BotToken) -> Self {
        Self {
            config,
            token,
            store: None,
            presence: None,
            backoff: BackoffConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Session store; sessions are kept in memory when unset
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Initial presence sent with IDENTIFY
    #[must_use]
    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Token whose cancellation shuts every shard down
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch gateway information through `dispatcher`, then start the shards
    pub async fn start(self, dispatcher: &RateLimitedDispatcher) -> GatewayResult<ShardManager> {
        let gateway = dispatcher.gateway_bot().await?;
        self.start_with_info(gateway)
    }

    /// Start the shards using already known gateway information
    pub fn start_with_info(self, gateway: GatewayBot) -> GatewayResult<ShardManager> {
        let shard_count = self.config.shard_count.unwrap_or(gateway.shards).max(1);
        let shard_ids = match &self.config.shard_ids {
            Some(ids) => ids.clone(),
            None => (0..shard_count).collect(),
        };

        if let Some(&shard_id) = shard_ids.iter().find(|id| **id >= shard_count) {
            return Err(GatewayError::InvalidShard {
                shard_id,
                shard_count,
            });
        }

        let limit = gateway.session_start_limit;
        if (limit.remaining as usize) < shard_ids.len() {
            return Err(GatewayError::SessionStartLimit {
                remaining: limit.remaining,
                required: shard_ids.len(),
                reset_after: limit.reset_after(),
            });
        }

        let gateway_url = self.config.url.clone().unwrap_or_else(|| gateway.url.clone());
        let gate = Arc::new(IdentifyGate::new(
            self.config.identify_interval,
            limit.max_concurrency,
        ));
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let store: Arc<dyn SessionStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemorySessionStore::new()),
        };

        let context = ShardContext {
            store,
            gate: Arc::clone(&gate),
            events: events_tx,
            cancel: self.cancel.clone(),
        };

        tracing::info!(
            shard_count,
            shards = shard_ids.len(),
            max_concurrency = gate.max_concurrency(),
            url = %gateway_url,
            "Starting shards"
        );

        let mut shards = Collection::new();
        let mut tasks = Vec::with_capacity(shard_ids.len());
        for shard_id in shard_ids {
            let mut config = ShardConfig::new(shard_id, shard_count, self.token.clone(), &self.config)
                .with_backoff(self.backoff);
            if let Some(presence) = &self.presence {
                config = config.with_presence(presence.clone());
            }

            let (connection, handle) =
                GatewayConnection::new(config, gateway_url.clone(), context.clone());
            shards.insert(shard_id, handle);
            tasks.push((shard_id, spawn_shard(connection, self.cancel.clone())));
        }

        Ok(ShardManager {
            shards,
            shard_count,
            events: Some(events_rx),
            gateway,
            cancel: self.cancel,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Run a shard; an authentication failure stops every shard
fn spawn_shard(connection: GatewayConnection, cancel: CancellationToken) -> ShardTask {
    tokio::spawn(async move {
        let shard_id = connection.shard_id();
        let result = connection.run().await;

        match &result {
            Ok(()) => tracing::debug!(shard_id, "Shard stopped"),
            Err(e) if e.category() == ErrorCategory::Authentication => {
                tracing::error!(shard_id, error = %e, "Authentication failed, stopping all shards");
                cancel.cancel();
            }
            Err(e) => tracing::error!(shard_id, error = %e, "Shard failed"),
        }
        result
    })
}

/// Running shards of one client
pub struct ShardManager {
    shards: Collection<u32, ShardHandle>,
    shard_count: u32,
    events: Option<mpsc::Receiver<ShardEvent>>,
    gateway: GatewayBot,
    cancel: CancellationToken,
    tasks: Mutex<Vec<(u32, ShardTask)>>,
}

impl ShardManager {
    #[must_use]
    pub fn builder(config: GatewayConfig, token: BotToken) -> ShardManagerBuilder {
        ShardManagerBuilder::new(config, token)
    }

    /// Take the merged event stream; `None` after the first call
    ///
    /// The channel holds `event_buffer` events. Once it is full every shard waits
    /// for the receiver, heartbeats included, so the receiver must be drained
    /// continuously. Dropping it discards events instead.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ShardEvent>> {
        self.events.take()
    }

    /// Total shard count of the bot
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Ids of the shards run by this manager, ascending
    pub fn shard_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.shards.keys().copied()
    }

    #[must_use]
    pub fn shard(&self, shard_id: u32) -> Option<&ShardHandle> {
        self.shards.get(&shard_id)
    }

    #[must_use]
    pub fn shards(&self) -> Arc<[ShardHandle]> {
        self.shards.values()
    }

    #[must_use]
    pub fn gateway(&self) -> &GatewayBot {
        &self.gateway
    }

    #[must_use]
    pub fn status(&self, shard_id: u32) -> Option<ShardState> {
        self.shards.get(&shard_id).map(ShardHandle::state)
    }

    /// Send a command to one shard
    pub async fn send(&self, shard_id: u32, command: GatewayCommand) -> GatewayResult<()> {
        let handle = self
            .shards
            .get(&shard_id)
            .ok_or(GatewayError::UnknownShard(shard_id))?;
        handle.send(command).await
    }

    /// Send a command to every shard
    ///
    /// Every shard is tried; the first failure is returned.
    pub async fn broadcast(&self, command: GatewayCommand) -> GatewayResult<()> {
        let mut first_error = None;
        for handle in self.shards.values().iter() {
            if let Err(e) = handle.send(command.clone()).await {
                tracing::warn!(shard_id = handle.shard_id(), error = %e, "Broadcast failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask every shard to close; use `join` to wait for them
    pub fn shutdown(&self) {
        tracing::info!(shards = self.shards.len(), "Shutting down shards");
        self.cancel.cancel();
    }

    /// Wait for every shard task to finish
    ///
    /// Returns the first fatal shard error.
    pub async fn join(&self) -> GatewayResult<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut first_error = None;

        for (shard_id, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(shard_id, error = %e, "Shard task panicked");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shard_count", &self.shard_count)
            .field("shards", &self.shards)
            .field("shutdown", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Drop for ShardManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
