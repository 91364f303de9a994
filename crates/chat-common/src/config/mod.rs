//! Configuration structs

mod client_config;

pub use client_config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig,
    SessionConfig,
};
