//! `GET /gateway/bot`

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dispatcher::RateLimitedDispatcher;
use crate::error::RestResult;
use crate::request::RestRequest;

/// Recommended gateway connection parameters for the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify quota for the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets to `total`
    pub reset_after: u64,
    /// Identify calls allowed per 5 second window
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl SessionStartLimit {
    #[must_use]
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

impl RateLimitedDispatcher {
    /// Fetch the gateway URL, recommended shard count and identify quota
    pub async fn gateway_bot(&self) -> RestResult<GatewayBot> {
        let response = self.enqueue(RestRequest::get("/gateway/bot")).await?;
        let bot: GatewayBot = response.json()?;
        tracing::debug!(
            url = %bot.url,
            shards = bot.shards,
            remaining = bot.session_start_limit.remaining,
            max_concurrency = bot.session_start_limit.max_concurrency,
            "Fetched gateway info"
        );
        Ok(bot)
    }
}
