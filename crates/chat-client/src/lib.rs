//! # chat-client
//!
//! Bot client: a [`Client`] bundles the rate-limited REST dispatcher and the
//! sharded gateway of one bot.
//!
//! ```ignore
//! let config = ClientConfig::from_env()?;
//! let mut client = Client::builder(config).start().await?;
//! let mut events = client.take_events().expect("events taken once");
//! while let Some(event) = events.recv().await {
//!     // ...
//! }
//! client.shutdown().await?;
//! ```

pub mod client;
pub mod error;

pub use client::{Client, ClientBuilder};
pub use error::{ClientError, ClientResult};
