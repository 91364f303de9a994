//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use chat_core::Intents;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::BotToken;

/// Main client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub token: BotToken,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// REST dispatcher configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL without the version segment
    pub api_base_url: String,
    pub api_version: u8,
    /// Retries for 5xx responses and transport errors
    pub retries: u32,
    /// Retries for 429 responses
    pub rate_limit_retries: u32,
    pub timeout: Duration,
    /// Global request ceiling across all buckets
    pub global_requests_per_second: u32,
    /// Extra wait added to every reset window to absorb clock drift
    pub offset: Duration,
    /// Log a warning every N invalid (401/403/429) responses; 0 disables
    pub invalid_request_warning_interval: u32,
}

impl RestConfig {
    /// Versioned API root, e.g. `https://host/api/v10`
    #[must_use]
    pub fn api_url(&self) -> String {
        format!(
            "{}/v{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            retries: default_rest_retries(),
            rate_limit_retries: default_rate_limit_retries(),
            timeout: Duration::from_millis(default_rest_timeout_ms()),
            global_requests_per_second: default_global_requests_per_second(),
            offset: Duration::from_millis(default_rest_offset_ms()),
            invalid_request_warning_interval: 0,
        }
    }
}

/// Gateway and sharding configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Overrides the URL returned by `GET /gateway/bot`
    pub url: Option<String>,
    pub api_version: u8,
    /// Total shard count; the recommended count is used when unset
    pub shard_count: Option<u32>,
    /// Subset of shards run by this process; all shards when unset
    pub shard_ids: Option<Vec<u32>>,
    pub intents: Intents,
    pub large_threshold: u32,
    /// Request `zlib-stream` transport compression
    pub compress: bool,
    pub hello_timeout: Duration,
    /// Minimum spacing between IDENTIFYs in one concurrency bucket
    pub identify_interval: Duration,
    /// Capacity of the shard event channel
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_version: default_api_version(),
            shard_count: None,
            shard_ids: None,
            intents: Intents::default(),
            large_threshold: default_large_threshold(),
            compress: false,
            hello_timeout: Duration::from_millis(default_hello_timeout_ms()),
            identify_interval: Duration::from_millis(default_identify_interval_ms()),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Session store configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Redis URL; sessions stay in memory when unset
    pub redis_url: Option<String>,
    pub max_connections: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            max_connections: default_redis_max_connections(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_api_base_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_rest_retries() -> u32 {
    3
}

fn default_rate_limit_retries() -> u32 {
    5
}

fn default_rest_timeout_ms() -> u64 {
    15_000
}

fn default_global_requests_per_second() -> u32 {
    50
}

fn default_rest_offset_ms() -> u64 {
    50
}

fn default_large_threshold() -> u32 {
    50
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_identify_interval_ms() -> u64 {
    5_000
}

fn default_event_buffer() -> usize {
    1024
}

fn default_redis_max_connections() -> u32 {
    10
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: BotToken) -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: Environment::default(),
            },
            token,
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or a variable cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("BOT_TOKEN").ok_or(ConfigError::MissingVar("BOT_TOKEN"))?;
        let token = BotToken::new(token)
            .map_err(|e| ConfigError::InvalidValue("BOT_TOKEN", e.to_string()))?;

        let api_version = parse_var(&lookup, "API_VERSION")?.unwrap_or_else(default_api_version);

        let intents = match lookup("GATEWAY_INTENTS") {
            Some(raw) => Intents::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue("GATEWAY_INTENTS", e.to_string()))?,
            None => Intents::default(),
        };

        let shard_ids = match lookup("GATEWAY_SHARD_IDS") {
            Some(raw) => Some(parse_shard_ids(&raw)?),
            None => None,
        };

        let config = Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            token,
            rest: RestConfig {
                api_base_url: lookup("API_BASE_URL").unwrap_or_else(default_api_base_url),
                api_version,
                retries: parse_var(&lookup, "REST_RETRIES")?.unwrap_or_else(default_rest_retries),
                rate_limit_retries: parse_var(&lookup, "REST_RATE_LIMIT_RETRIES")?
                    .unwrap_or_else(default_rate_limit_retries),
                timeout: Duration::from_millis(
                    parse_var(&lookup, "REST_TIMEOUT_MS")?.unwrap_or_else(default_rest_timeout_ms),
                ),
                global_requests_per_second: parse_var(&lookup, "REST_GLOBAL_REQUESTS_PER_SECOND")?
                    .unwrap_or_else(default_global_requests_per_second),
                offset: Duration::from_millis(
                    parse_var(&lookup, "REST_OFFSET_MS")?.unwrap_or_else(default_rest_offset_ms),
                ),
                invalid_request_warning_interval: parse_var(
                    &lookup,
                    "REST_INVALID_REQUEST_WARNING_INTERVAL",
                )?
                .unwrap_or(0),
            },
            gateway: GatewayConfig {
                url: lookup("GATEWAY_URL"),
                api_version,
                shard_count: parse_var(&lookup, "GATEWAY_SHARD_COUNT")?,
                shard_ids,
                intents,
                large_threshold: parse_var(&lookup, "GATEWAY_LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
                compress: parse_var(&lookup, "GATEWAY_COMPRESS")?.unwrap_or(false),
                hello_timeout: Duration::from_millis(
                    parse_var(&lookup, "GATEWAY_HELLO_TIMEOUT_MS")?
                        .unwrap_or_else(default_hello_timeout_ms),
                ),
                identify_interval: Duration::from_millis(
                    parse_var(&lookup, "GATEWAY_IDENTIFY_INTERVAL_MS")?
                        .unwrap_or_else(default_identify_interval_ms),
                ),
                event_buffer: parse_var(&lookup, "GATEWAY_EVENT_BUFFER")?
                    .unwrap_or_else(default_event_buffer),
            },
            session: SessionConfig {
                redis_url: lookup("SESSION_REDIS_URL"),
                max_connections: parse_var(&lookup, "REDIS_MAX_CONNECTIONS")?
                    .unwrap_or_else(default_redis_max_connections),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=250).contains(&self.gateway.large_threshold) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_LARGE_THRESHOLD",
                "must be between 50 and 250".to_string(),
            ));
        }

        if self.gateway.shard_count == Some(0) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_SHARD_COUNT",
                "must be at least 1".to_string(),
            ));
        }

        if let (Some(ids), Some(count)) = (&self.gateway.shard_ids, self.gateway.shard_count) {
            if let Some(bad) = ids.iter().find(|id| **id >= count) {
                return Err(ConfigError::InvalidValue(
                    "GATEWAY_SHARD_IDS",
                    format!("shard {bad} is out of range for {count} shards"),
                ));
            }
        }

        if self.gateway.event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_EVENT_BUFFER",
                "must be at least 1".to_string(),
            ));
        }

        if self.rest.global_requests_per_second == 0 {
            return Err(ConfigError::InvalidValue(
                "REST_GLOBAL_REQUESTS_PER_SECOND",
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(None),
    }
}

fn parse_shard_ids(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let mut ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_SHARD_IDS", raw.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        return Err(ConfigError::InvalidValue(
            "GATEWAY_SHARD_IDS",
            "no shard ids given".to_string(),
        ));
    }
    Ok(ids)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
