//! Errors a procedure can fail with.
//!
//! [`RpcError`] is the closed set of client-actionable failures. Each kind has
//! a JSON payload ([`RpcError::to_payload`]) and a fixed HTTP status, mapped
//! by the server transport only (see `server::http_status`).
//!
//! Anything else is an internal failure: logged server-side and answered
//! with a bare 500.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::state::StateError;

/// Client-actionable RPC failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Generic failure, message sent as-is.
    #[error("{0}")]
    Generic(String),

    /// Request body was not a JSON array.
    #[error("Invalid request body")]
    InvalidRequestBody,

    /// Input validation failed; carries the structured detail if any.
    #[error("Validation error")]
    Validation(Option<Value>),

    /// Caller is not authenticated.
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller is authenticated but not allowed.
    #[error("Forbidden")]
    Forbidden,

    /// No procedure is registered under the requested id.
    #[error("Unknown procedure")]
    ProcedureNotFound,
}

impl RpcError {
    /// Generic error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        RpcError::Generic(message.into())
    }

    /// Validation error with a structured payload.
    ///
    /// A payload that fails to serialize degrades to a payload-less error.
    pub fn validation(payload: impl Serialize) -> Self {
        RpcError::Validation(serde_json::to_value(payload).ok())
    }

    /// JSON body sent to the client: the validation payload when present,
    /// otherwise the message.
    pub fn to_payload(&self) -> Value {
        match self {
            RpcError::Validation(Some(payload)) => payload.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

/// Failure of a procedure or a server hook.
#[derive(Debug, Error)]
pub enum ProcedureError {
    /// Known kind, answered with its status and payload.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Unexpected failure, logged and answered with a bare 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProcedureError {
    /// Wrap any error as an internal failure.
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProcedureError::Internal(anyhow::Error::new(err))
    }

    /// The RPC kind, if this is one.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            ProcedureError::Rpc(err) => Some(err),
            ProcedureError::Internal(_) => None,
        }
    }
}

impl From<serde_json::Error> for ProcedureError {
    fn from(err: serde_json::Error) -> Self {
        ProcedureError::internal(err)
    }
}

impl From<std::io::Error> for ProcedureError {
    fn from(err: std::io::Error) -> Self {
        ProcedureError::internal(err)
    }
}

impl From<StateError> for ProcedureError {
    fn from(err: StateError) -> Self {
        ProcedureError::internal(err)
    }
}
