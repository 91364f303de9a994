//! Frame codec
//!
//! Text frames carry JSON directly. With `zlib-stream` transport compression the server
//! sends binary frames that are chunks of one deflate stream per socket; a message is
//! complete when the accumulated bytes end with the `00 00 ff ff` sync-flush suffix.

use chat_common::ErrorCategory;
use flate2::{Decompress, FlushDecompress};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::GatewayFrame;

/// Suffix ending every complete `zlib-stream` message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const INFLATE_CHUNK: usize = 32 * 1024;

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The inflate stream is corrupt; the socket must be replaced
    #[error("Inflate stream corrupt: {0}")]
    Inflate(String),

    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Inflate(_) => ErrorCategory::TransientNetwork,
            Self::Json(_) => ErrorCategory::MalformedFrame,
        }
    }

    /// Whether the error poisons the rest of the socket's stream
    #[must_use]
    pub fn is_stream_corrupt(&self) -> bool {
        matches!(self, Self::Inflate(_))
    }
}

/// Persistent inflate context for one socket
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("buffered", &self.buffer.len())
            .field("total_in", &self.decompress.total_in())
            .field("total_out", &self.decompress.total_out())
            .finish()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary frame
    ///
    /// Returns the inflated message once the suffix is seen, `None` while a message is
    /// still partial.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut output = Vec::with_capacity(self.buffer.len() * 4);
        let mut consumed = 0usize;

        loop {
            if output.capacity() - output.len() < INFLATE_CHUNK {
                output.reserve(INFLATE_CHUNK);
            }

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            self.decompress
                .decompress_vec(&self.buffer[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|e| CodecError::Inflate(e.to_string()))?;

            let read = (self.decompress.total_in() - in_before) as usize;
            let written = self.decompress.total_out() - out_before;
            consumed += read;

            if consumed >= self.buffer.len() && output.len() < output.capacity() {
                break;
            }
            if read == 0 && written == 0 {
                break;
            }
        }

        self.buffer.clear();
        Ok(Some(output))
    }

    /// Start a fresh stream for a new socket
    pub fn reset(&mut self) {
        self.decompress.reset(true);
        self.buffer.clear();
    }
}

/// Turns socket messages into frames and back
#[derive(Debug, Default)]
pub struct FrameCodec {
    inflater: Option<Inflater>,
}

impl FrameCodec {
    /// `compress` enables the `zlib-stream` inflater for binary frames
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self {
            inflater: compress.then(Inflater::new),
        }
    }

    /// Decode a socket message; `Ok(None)` for control frames and partial messages
    pub fn decode(&mut self, message: &Message) -> Result<Option<GatewayFrame>, CodecError> {
        match message {
            Message::Text(text) => Ok(Some(GatewayFrame::from_json(text)?)),
            Message::Binary(bytes) => match self.inflater.as_mut() {
                Some(inflater) => match inflater.push(bytes)? {
                    Some(inflated) => Ok(Some(GatewayFrame::from_slice(&inflated)?)),
                    None => Ok(None),
                },
                None => Ok(Some(GatewayFrame::from_slice(bytes)?)),
            },
            _ => Ok(None),
        }
    }

    pub fn encode(frame: &GatewayFrame) -> Result<Message, CodecError> {
        Ok(Message::Text(frame.to_json()?))
    }

    pub fn reset(&mut self) {
        if let Some(inflater) = self.inflater.as_mut() {
            inflater.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Compress `messages` as one zlib stream, sync-flushing after each
    fn zlib_stream(messages: &[&str]) -> Vec<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        messages
            .iter()
            .map(|message| {
                encoder.write_all(message.as_bytes()).unwrap();
                encoder.flush().unwrap();
                std::mem::take(encoder.get_mut())
            })
            .collect()
    }

    #[test]
    fn test_inflate_shared_context() {
        let chunks = zlib_stream(&[
            r#"{"op":10,"d":{"heartbeat_interval":41250}}"#,
            r#"{"op":11,"d":null}"#,
        ]);
        assert!(chunks.iter().all(|c| c.ends_with(&ZLIB_SUFFIX)));

        let mut inflater = Inflater::new();
        let first = inflater.push(&chunks[0]).unwrap().unwrap();
        assert_eq!(first, br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
        // Second message only decodes with the dictionary built by the first
        let second = inflater.push(&chunks[1]).unwrap().unwrap();
        assert_eq!(second, br#"{"op":11,"d":null}"#);
    }

    #[test]
    fn test_partial_message_is_buffered() {
        let chunks = zlib_stream(&[r#"{"op":0,"d":{"content":"split across frames"},"s":1,"t":"MESSAGE_CREATE"}"#]);
        let (head, tail) = chunks[0].split_at(chunks[0].len() / 2);

        let mut inflater = Inflater::new();
        assert!(inflater.push(head).unwrap().is_none());
        let message = inflater.push(tail).unwrap().unwrap();
        assert!(message.starts_with(br#"{"op":0"#));
    }

    #[test]
    fn test_large_message() {
        let content = "x".repeat(200_000);
        let json = format!(r#"{{"op":0,"d":{{"content":"{content}"}},"s":1,"t":"MESSAGE_CREATE"}}"#);
        let chunks = zlib_stream(&[&json]);

        let mut inflater = Inflater::new();
        let message = inflater.push(&chunks[0]).unwrap().unwrap();
        assert_eq!(message.len(), json.len());
    }

    #[test]
    fn test_corrupt_stream() {
        let mut inflater = Inflater::new();
        let err = inflater.push(&[0x01, 0x02, 0x03, 0x00, 0x00, 0xff, 0xff]).unwrap_err();
        assert!(err.is_stream_corrupt());
        assert_eq!(err.category(), ErrorCategory::TransientNetwork);
    }

    #[test]
    fn test_reset_starts_new_stream() {
        let mut inflater = Inflater::new();
        inflater.push(&zlib_stream(&[r#"{"op":11}"#])[0]).unwrap();

        inflater.reset();
        let fresh = zlib_stream(&[r#"{"op":7}"#]);
        assert_eq!(inflater.push(&fresh[0]).unwrap().unwrap(), br#"{"op":7}"#);
    }

    #[test]
    fn test_codec_decode() {
        let mut codec = FrameCodec::new(true);

        let text = Message::Text(r#"{"op":11,"d":null}"#.to_string());
        assert_eq!(codec.decode(&text).unwrap().unwrap().op, OpCode::HeartbeatAck);

        let binary = Message::Binary(zlib_stream(&[r#"{"op":7,"d":null}"#]).remove(0));
        assert_eq!(codec.decode(&binary).unwrap().unwrap().op, OpCode::Reconnect);

        assert!(codec.decode(&Message::Ping(Vec::new())).unwrap().is_none());

        let malformed = Message::Text("{not json".to_string());
        let err = codec.decode(&malformed).unwrap_err();
        assert!(!err.is_stream_corrupt());
        assert_eq!(err.category(), ErrorCategory::MalformedFrame);
    }

    #[test]
    fn test_codec_encode() {
        let message = FrameCodec::encode(&GatewayFrame::heartbeat(Some(3))).unwrap();
        assert_eq!(message, Message::Text(r#"{"op":1,"d":3}"#.to_string()));
    }
}
