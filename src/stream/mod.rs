//! Stream module - push-based producers adapted to pull-based consumers.
//!
//! - [`EventStream`] - lazily started, cancellable stream over a bounded channel
//! - [`Controller`] - producer handle (`enqueue`, `close`, `error`)
//!
//! Procedures return an `EventStream<T>` to answer with Server-Sent Events;
//! the client exposes received streams through the same item type.

mod event_stream;

pub use event_stream::{event_stream, Cleanup, Controller, EventStream, ValueStream};

use thiserror::Error;

/// Terminal error of a stream, delivered after all queued values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    message: String,
}

impl StreamError {
    /// Create a stream error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StreamError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StreamError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for StreamError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The stream already reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stream is closed")]
pub struct StreamClosed;

/// Failure of [`Controller::try_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The consumer's buffer is full.
    #[error("Stream buffer is full")]
    Full,
    /// The stream already reached a terminal state.
    #[error("Stream is closed")]
    Closed,
}

impl From<StreamClosed> for EnqueueError {
    fn from(_: StreamClosed) -> Self {
        EnqueueError::Closed
    }
}
