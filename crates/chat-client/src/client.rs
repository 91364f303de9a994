//! Client handle
//!
//! One `Client` owns the REST dispatcher and the shard manager of one bot. Several
//! clients can live in the same process; nothing here is global.

use chat_cache::{session_store_from_config, SessionStore};
use chat_common::ClientConfig;
use chat_gateway::protocol::UpdatePresence;
use chat_gateway::{GatewayCommand, ShardEvent, ShardManager};
use chat_rest::{GatewayBot, HttpTransport, RateLimitedDispatcher};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ClientResult;

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn SessionStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    presence: Option<UpdatePresence>,
    gateway: Option<GatewayBot>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            presence: None,
            gateway: None,
        }
    }

    /// Use this session store instead of the configured one
    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Send REST calls through a custom transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Skip `GET /gateway/bot` and use this gateway information
    #[must_use]
    pub fn gateway_info(mut self, gateway: GatewayBot) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Build the dispatcher and start every shard
    pub async fn start(self) -> ClientResult<Client> {
        let config = self.config;

        let rest = match self.transport {
            Some(transport) => RateLimitedDispatcher::with_transport(
                config.rest.clone(),
                Some(config.token.clone()),
                transport,
            ),
            None => RateLimitedDispatcher::new(config.rest.clone(), config.token.clone())?,
        };

        let store = match self.store {
            Some(store) => store,
            None => session_store_from_config(&config.session, &config.app.name)?,
        };

        let mut gateway = ShardManager::builder(config.gateway.clone(), config.token.clone())
            .store(store);
        if let Some(presence) = self.presence {
            gateway = gateway.presence(presence);
        }

        let gateway = match self.gateway {
            Some(info) => gateway.start_with_info(info),
            None => gateway.start(&rest).await,
        };
        let gateway = match gateway {
            Ok(gateway) => gateway,
            Err(e) => {
                rest.shutdown();
                return Err(e.into());
            }
        };

        tracing::info!(
            app = %config.app.name,
            env = ?config.app.env,
            shards = gateway.shards().len(),
            "Client started"
        );

        Ok(Client {
            config,
            rest,
            gateway,
        })
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("app", &self.config.app.name)
            .field("presence", &self.presence)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// A running bot: REST dispatcher plus shards
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    rest: RateLimitedDispatcher,
    gateway: ShardManager,
}

impl Client {
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn rest(&self) -> &RateLimitedDispatcher {
        &self.rest
    }

    #[must_use]
    pub fn gateway(&self) -> &ShardManager {
        &self.gateway
    }

    /// Take the merged shard event stream; `None` after the first call
    ///
    /// Keep draining the receiver: shards pause, heartbeats included, while it is full.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ShardEvent>> {
        self.gateway.take_events()
    }

    /// Send a command to every shard
    pub async fn broadcast(&self, command: GatewayCommand) -> ClientResult<()> {
        Ok(self.gateway.broadcast(command).await?)
    }

    /// Close every shard, fail queued REST requests and wait for the shards to stop
    ///
    /// Returns the first fatal shard error, if any shard failed before shutdown.
    pub async fn shutdown(&self) -> ClientResult<()> {
        tracing::info!(app = %self.config.app.name, "Client shutting down");
        self.gateway.shutdown();
        self.rest.shutdown();
        Ok(self.gateway.join().await?)
    }

    /// Wait until every shard stopped on its own
    pub async fn join(&self) -> ClientResult<()> {
        let result = self.gateway.join().await;
        self.rest.shutdown();
        Ok(result?)
    }
}
