//! Server-Sent Events framing.
//!
//! Frame layout as written by the server:
//!
//! ```text
//! event: connected        <- sentinel, always first
//! data:
//!
//! data: "hello"           <- one unnamed event per value
//!
//! event: error            <- optional terminal failure
//! data: boom
//!
//! ```
//!
//! Data containing line breaks is split over several `data:` lines, which a
//! decoder joins back with `\n`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::codec::JsonCodec;
use crate::error::Result;

/// Content type of an event-stream response.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Name of the sentinel event sent before any value.
pub const CONNECTED_EVENT: &str = "connected";

/// Name of the terminal failure event.
pub const ERROR_EVENT: &str = "error";

/// One SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `None` for unnamed (value) events.
    pub event: Option<String>,
    /// Data payload, lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// The `connected` sentinel.
    pub fn connected() -> Self {
        Self {
            event: Some(CONNECTED_EVENT.to_string()),
            data: String::new(),
        }
    }

    /// Unnamed event carrying the JSON encoding of `value`.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            event: None,
            data: JsonCodec::encode_string(value)?,
        })
    }

    /// Terminal `error` event carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event: Some(ERROR_EVENT.to_string()),
            data: message.into(),
        }
    }

    /// Whether this is the `connected` sentinel.
    pub fn is_connected(&self) -> bool {
        self.event.as_deref() == Some(CONNECTED_EVENT)
    }

    /// Whether this is a terminal `error` event.
    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some(ERROR_EVENT)
    }

    /// Encode as one frame, terminated by a blank line.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 32);

        if let Some(event) = &self.event {
            buf.put_slice(b"event: ");
            // Line breaks would end the field early.
            for part in event.split(['\r', '\n']) {
                buf.put_slice(part.as_bytes());
            }
            buf.put_u8(b'\n');
        }

        if self.data.is_empty() {
            buf.put_slice(b"data:\n");
        } else {
            for line in self.data.split('\n') {
                let line = line.strip_suffix('\r').unwrap_or(line);
                buf.put_slice(b"data: ");
                buf.put_slice(line.as_bytes());
                buf.put_u8(b'\n');
            }
        }

        buf.put_u8(b'\n');
        buf.freeze()
    }
}
