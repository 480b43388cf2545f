//! Error types for seamless-rpc.
//!
//! [`Error`] covers configuration failures (fatal at startup) and client-side
//! transport failures. Per-request failures raised by procedures use
//! [`ProcedureError`](crate::procedure::ProcedureError) instead.

use thiserror::Error;

use crate::client::RpcClientError;
use crate::state::StateError;
use crate::stream::StreamError;

/// Main error type for registry construction and client calls.
#[derive(Debug, Error)]
pub enum Error {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An include/exclude glob pattern could not be parsed.
    #[error("Invalid glob pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Two procedures computed the same id (plain or hashed form).
    #[error("Duplicate procedure id `{id}` (registered from `{path}`)")]
    DuplicateProcedureId { id: String, path: String },

    /// An export name that cannot form a procedure id.
    #[error("Invalid procedure name `{name}` in `{path}`")]
    InvalidProcedureName { name: String, path: String },

    /// Protocol error (malformed event stream, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network-level failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error(transparent)]
    Status(#[from] RpcClientError),

    /// The server answered with an event stream but streaming is disabled.
    #[error("SSE support is not enabled.")]
    SseDisabled,

    /// The event stream failed, either in-band or on the connection.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The reply did not have the shape the caller asked for.
    #[error("Unexpected reply: expected {expected}")]
    UnexpectedReply { expected: &'static str },

    /// `subscribe` called while a previous `subscribe` is still pending.
    #[error("Already subscribing.")]
    AlreadySubscribing,

    /// `subscribe` called while a subscription is active.
    #[error("Already subscribed.")]
    AlreadySubscribed,

    /// Execution context misuse.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
