//! Protocol module - Server-Sent Events framing for streamed results.
//!
//! This module implements the streaming half of the wire protocol:
//! - [`SseEvent`] - one event, encoded exactly as the server writes it
//! - [`SseBuffer`] - incremental decoder for partial reads on the client

mod sse;
mod sse_buffer;

pub use sse::{SseEvent, CONNECTED_EVENT, ERROR_EVENT, EVENT_STREAM_CONTENT_TYPE};
pub use sse_buffer::{SseBuffer, DEFAULT_MAX_EVENT_SIZE};
