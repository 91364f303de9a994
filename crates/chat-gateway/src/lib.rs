//! # chat-gateway
//!
//! Realtime gateway client: one WebSocket session per shard, with heartbeating,
//! resume and reconnect handled by a per-shard state machine.
//!
//! ## Layout
//!
//! - [`protocol`]: frames, opcodes, close codes and payloads
//! - [`codec`]: text/`zlib-stream` frame decoding
//! - [`machine`]: the pure shard state machine
//! - [`connection`]: the async driver that owns a shard's socket
//! - [`manager`]: spawns shards and merges their events

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod identify;
pub mod machine;
pub mod manager;
pub mod protocol;

pub use backoff::{Backoff, BackoffConfig};
pub use codec::{CodecError, FrameCodec, Inflater};
pub use config::ShardConfig;
pub use connection::{GatewayConnection, ShardContext, ShardHandle};
pub use error::{GatewayError, GatewayResult};
pub use events::ShardEvent;
pub use heartbeat::{HeartbeatState, HeartbeatTimer};
pub use identify::IdentifyGate;
pub use machine::{ShardAction, ShardInput, ShardMachine, ShardState};
pub use manager::{ShardManager, ShardManagerBuilder};
pub use protocol::{GatewayCommand, GatewayFrame, OpCode};
