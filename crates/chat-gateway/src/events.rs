//! Shard lifecycle and dispatch events

use chat_common::ErrorCategory;
use serde_json::Value;
use std::time::Duration;

/// Everything a shard reports to the application, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    /// IDENTIFY succeeded; a new session was started
    Ready { shard_id: u32, session_id: String },

    /// RESUME succeeded; `replayed` dispatches were replayed before RESUMED
    Resumed { shard_id: u32, replayed: u64 },

    /// A decoded dispatch frame
    Dispatch {
        shard_id: u32,
        event: String,
        sequence: Option<u64>,
        data: Value,
    },

    HeartbeatAck { shard_id: u32, latency: Duration },

    /// The socket closed; `code` is `None` when no close frame was received
    Disconnected { shard_id: u32, code: Option<u16> },

    /// A new socket will be opened; `resume` tells whether the session is kept
    Reconnecting { shard_id: u32, resume: bool },

    /// The shard stopped and will not reconnect
    Fatal {
        shard_id: u32,
        code: Option<u16>,
        category: ErrorCategory,
        reason: String,
    },
}

impl ShardEvent {
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Ready { shard_id, .. }
            | Self::Resumed { shard_id, .. }
            | Self::Dispatch { shard_id, .. }
            | Self::HeartbeatAck { shard_id, .. }
            | Self::Disconnected { shard_id, .. }
            | Self::Reconnecting { shard_id, .. }
            | Self::Fatal { shard_id, .. } => *shard_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Resumed { .. } => "resumed",
            Self::Dispatch { .. } => "dispatch",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Fatal { .. } => "fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_and_kind() {
        let event = ShardEvent::Dispatch {
            shard_id: 3,
            event: "MESSAGE_CREATE".to_string(),
            sequence: Some(1),
            data: Value::Null,
        };
        assert_eq!(event.shard_id(), 3);
        assert_eq!(event.kind(), "dispatch");

        let fatal = ShardEvent::Fatal {
            shard_id: 0,
            code: Some(4004),
            category: ErrorCategory::Authentication,
            reason: "Authentication failed".to_string(),
        };
        assert_eq!(fatal.kind(), "fatal");
    }
}
