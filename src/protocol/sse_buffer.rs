//! Buffer for decoding Server-Sent Events from partial reads.
//!
//! Uses `bytes::BytesMut` to accumulate chunks and splits complete lines off
//! the front. Lines end with `\n` or `\r\n`. An event is dispatched on a
//! blank line once it has seen a `data` or `event` field; comment lines
//! (leading `:`) as well as `id` and `retry` fields are ignored.
//!
//! # Example
//!
//! ```
//! use seamless_rpc::protocol::SseBuffer;
//!
//! let mut buffer = SseBuffer::new();
//!
//! assert!(buffer.push(b"event: connected\nda").unwrap().is_empty());
//! let events = buffer.push(b"ta:\n\ndata: 1\n\n").unwrap();
//!
//! assert!(events[0].is_connected());
//! assert_eq!(events[1].data, "1");
//! ```

use bytes::BytesMut;

use super::SseEvent;
use crate::error::{Error, Result};

/// Default limit on buffered bytes for one event (16 MiB).
pub const DEFAULT_MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;

/// Accumulates bytes and yields complete events.
pub struct SseBuffer {
    /// Bytes not yet split into lines.
    buffer: BytesMut,
    /// Event under construction.
    event: Option<String>,
    data: String,
    saw_data: bool,
    /// Limit on pending bytes plus the event under construction.
    max_event_size: usize,
}

impl SseBuffer {
    /// Create a buffer with the default size limit.
    pub fn new() -> Self {
        Self::with_max_event_size(DEFAULT_MAX_EVENT_SIZE)
    }

    /// Create a buffer with a custom size limit.
    pub fn with_max_event_size(max_event_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            event: None,
            data: String::new(),
            saw_data: false,
            max_event_size,
        }
    }

    /// Push a chunk and extract every event it completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on invalid UTF-8 or when one event
    /// outgrows the size limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = &line[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let line = std::str::from_utf8(line)
                .map_err(|e| Error::Protocol(format!("Invalid UTF-8 in event stream: {e}")))?;

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        let pending = self.buffer.len() + self.data.len();
        if pending > self.max_event_size {
            return Err(Error::Protocol(format!(
                "Event size {} exceeds maximum {}",
                pending, self.max_event_size
            )));
        }

        Ok(events)
    }

    /// Bytes buffered but not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial event.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_event();
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.saw_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.saw_data = true;
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.saw_data && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take().filter(|name| !name.is_empty()),
            data: std::mem::take(&mut self.data),
        };
        self.reset_event();
        Some(event)
    }

    fn reset_event(&mut self) {
        self.event = None;
        self.data.clear();
        self.saw_data = false;
    }
}

impl Default for SseBuffer {
    fn default() -> Self {
        Self::new()
    }
}
