//! # chat-common
//!
//! Shared utilities including configuration, error classification, bot tokens, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{BotToken, TokenError};
pub use config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig,
    SessionConfig,
};
pub use error::ErrorCategory;
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
