//! Gateway frame format
//!
//! Every frame on the socket is `{op, d, s, t}`.

use super::{HelloPayload, IdentifyPayload, OpCode, ResumePayload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One gateway frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Operation code
    pub op: OpCode,

    /// Event data payload
    #[serde(default)]
    pub d: Value,

    /// Sequence number (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Self {
        Self::new(op, serde_json::to_value(payload).unwrap_or_default())
    }

    // === Client Frames ===

    /// Heartbeat (op 1) carrying the last sequence received
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            last_sequence.map_or(Value::Null, |s| Value::Number(s.into())),
        )
    }

    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::with_payload(OpCode::Identify, payload)
    }

    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::with_payload(OpCode::Resume, payload)
    }

    // === Server Frames ===

    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::with_payload(OpCode::Hello, &HelloPayload { heartbeat_interval })
    }

    #[must_use]
    pub fn dispatch(event: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Utilities ===

    /// Decode the `d` field
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl std::fmt::Display for GatewayFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayFrame(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayFrame(op={})", self.op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_frame() {
        assert_eq!(
            GatewayFrame::heartbeat(Some(41)).to_json().unwrap(),
            r#"{"op":1,"d":41}"#
        );
        assert_eq!(
            GatewayFrame::heartbeat(None).to_json().unwrap(),
            r#"{"op":1,"d":null}"#
        );
    }

    #[test]
    fn test_parse_dispatch() {
        let frame = GatewayFrame::from_json(
            r#"{"op":0,"d":{"content":"hi"},"s":42,"t":"MESSAGE_CREATE"}"#,
        )
        .unwrap();

        assert_eq!(frame.op, OpCode::Dispatch);
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.d, json!({"content": "hi"}));
    }

    #[test]
    fn test_parse_null_fields() {
        let frame = GatewayFrame::from_json(r#"{"op":11,"d":null,"s":null,"t":null}"#).unwrap();
        assert_eq!(frame, GatewayFrame::heartbeat_ack());

        let frame = GatewayFrame::from_json(r#"{"op":7}"#).unwrap();
        assert_eq!(frame, GatewayFrame::reconnect());
    }

    #[test]
    fn test_hello_data() {
        let frame = GatewayFrame::from_json(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        let hello: HelloPayload = frame.data().unwrap();
        assert_eq!(hello.heartbeat_interval, 41_250);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        assert!(GatewayFrame::from_json(r#"{"op":5,"d":null}"#).is_err());
    }

    #[test]
    fn test_frame_display() {
        let frame = GatewayFrame::dispatch("READY", 1, json!({}));
        assert_eq!(frame.to_string(), "GatewayFrame(op=Dispatch (0), t=READY, s=1)");
        assert_eq!(
            GatewayFrame::hello(1).to_string(),
            "GatewayFrame(op=Hello (10))"
        );
    }
}
