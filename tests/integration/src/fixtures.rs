//! Test fixtures and payload builders

use chat_gateway::GatewayFrame;
use serde_json::{json, Value};

/// Token every test client identifies with
pub const TEST_TOKEN: &str = "integration-token";

/// `GET /gateway/bot` body pointing at `gateway_url`
pub fn gateway_bot_body(gateway_url: &str, shards: u32, remaining: u32) -> Value {
    json!({
        "url": gateway_url,
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": remaining,
            "reset_after": 3_600_000,
            "max_concurrency": 1
        }
    })
}

/// READY dispatch for a fresh session
pub fn ready(sequence: u64, session_id: &str, resume_url: &str, shard: [u32; 2]) -> GatewayFrame {
    GatewayFrame::dispatch(
        "READY",
        sequence,
        json!({
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": resume_url,
            "shard": shard,
            "user": { "id": "1", "username": "bot" },
            "guilds": []
        }),
    )
}

/// Plain MESSAGE_CREATE dispatch
pub fn message_create(sequence: u64, content: &str) -> GatewayFrame {
    GatewayFrame::dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({ "id": sequence.to_string(), "channel_id": "10", "content": content }),
    )
}

pub fn resumed(sequence: u64) -> GatewayFrame {
    GatewayFrame::dispatch("RESUMED", sequence, Value::Null)
}
