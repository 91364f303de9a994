//! Per-shard configuration

use chat_common::{BotToken, GatewayConfig};
use chat_core::Intents;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{IdentifyProperties, UpdatePresence};

/// Everything one shard needs to connect and identify
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub shard_id: u32,
    pub shard_count: u32,
    pub token: BotToken,
    pub intents: Intents,
    pub large_threshold: u32,
    /// Request `zlib-stream` transport compression
    pub compress: bool,
    pub api_version: u8,
    pub hello_timeout: Duration,
    pub properties: IdentifyProperties,
    /// Initial presence sent in IDENTIFY
    pub presence: Option<UpdatePresence>,
    pub backoff: BackoffConfig,
}

impl ShardConfig {
    #[must_use]
    pub fn new(shard_id: u32, shard_count: u32, token: BotToken, gateway: &GatewayConfig) -> Self {
        Self {
            shard_id,
            shard_count,
            token,
            intents: gateway.intents,
            large_threshold: gateway.large_threshold,
            compress: gateway.compress,
            api_version: gateway.api_version,
            hello_timeout: gateway.hello_timeout,
            properties: IdentifyProperties::default(),
            presence: None,
            backoff: BackoffConfig::default(),
        }
    }

    #[must_use]
    pub fn with_presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// `[shard_id, shard_count]` as sent in IDENTIFY
    #[must_use]
    pub fn shard(&self) -> [u32; 2] {
        [self.shard_id, self.shard_count]
    }

    /// Connect URL with version, encoding and compression query parameters
    pub fn connect_url(&self, base: &str) -> GatewayResult<String> {
        let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(GatewayError::InvalidUrl(base.to_string()));
        }

        let mut url = format!("{base}/?v={}&encoding=json", self.api_version);
        if self.compress {
            url.push_str("&compress=zlib-stream");
        }
        Ok(url)
    }
}
