//! Payload definitions
//!
//! Structures carried in the `d` field of gateway frames.

use chat_core::{Intents, Snowflake};
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Raw token, without the `Bot ` prefix
    pub token: String,
    pub properties: IdentifyProperties,
    /// Payload compression; always off, transport compression is used instead
    #[serde(default)]
    pub compress: bool,
    /// Member count above which offline members are not sent
    pub large_threshold: u32,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    pub intents: Intents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresence>,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: Option<u64>,
}

/// Fields of the READY dispatch the connection layer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Online status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Dnd,
    Idle,
    Invisible,
    Offline,
}

/// Activity shown in a presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    /// 0 playing, 1 streaming, 2 listening, 3 watching, 4 custom, 5 competing
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: 0,
            url: None,
        }
    }
}

/// Payload for op 3 (Presence Update), also sent inside IDENTIFY
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdatePresence {
    /// Unix time in milliseconds the client went idle
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: Status,
    pub afk: bool,
}

impl UpdatePresence {
    #[must_use]
    pub fn new(status: Status) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// 0 requests every member matching `query`
    pub limit: u32,
    #[serde(default)]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembers {
    /// Request every member of a guild
    #[must_use]
    pub fn all(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
            nonce: None,
        }
    }
}

/// Payload for op 4 (Voice State Update)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVoiceState {
    pub guild_id: Snowflake,
    /// `None` leaves the voice channel
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identify_serialization() {
        let identify = IdentifyPayload {
            token: "abc".to_string(),
            properties: IdentifyProperties::default(),
            compress: false,
            large_threshold: 50,
            shard: [1, 4],
            intents: Intents::GUILDS | Intents::GUILD_MESSAGES,
            presence: None,
        };

        let value = serde_json::to_value(&identify).unwrap();
        assert_eq!(value["token"], "abc");
        assert_eq!(value["shard"], json!([1, 4]));
        assert_eq!(value["intents"], json!(513));
        assert!(value.get("presence").is_none());
    }

    #[test]
    fn test_ready_ignores_unknown_fields() {
        let ready: ReadyPayload = serde_json::from_value(json!({
            "v": 10,
            "session_id": "abc",
            "resume_gateway_url": "wss://resume.example",
            "guilds": [],
            "user": {"id": "1"}
        }))
        .unwrap();

        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://resume.example"));
        assert_eq!(ready.shard, None);
    }

    #[test]
    fn test_presence_serialization() {
        let presence = UpdatePresence::new(Status::Dnd).with_activity(Activity::playing("chess"));
        let value = serde_json::to_value(&presence).unwrap();
        assert_eq!(value["status"], "dnd");
        assert_eq!(value["since"], json!(null));
        assert_eq!(value["activities"][0], json!({"name": "chess", "type": 0}));
    }

    #[test]
    fn test_request_guild_members() {
        let request = RequestGuildMembers::all(Snowflake::new(81_384_788_765_712_384));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["guild_id"], "81384788765712384");
        assert_eq!(value["query"], "");
        assert_eq!(value["limit"], 0);
    }
}
