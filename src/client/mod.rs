//! Client transport - calling procedures over HTTP with reqwest.
//!
//! - [`RpcClient`] - shared HTTP client, configuration and shutdown hooks
//! - [`RemoteProcedure`] - one procedure id, callable with positional arguments
//! - [`Reply`] / [`FromReply`] - decoded response and typed conversions
//! - [`RpcStream`] - values of an event-stream reply
//! - [`Subscription`] - callback-driven consumer of a stream
//!
//! # Example
//!
//! ```no_run
//! use seamless_rpc::client::{RpcClient, RpcStream};
//! use seamless_rpc::config::ClientConfig;
//! use serde_json::json;
//!
//! # async fn run() -> seamless_rpc::Result<()> {
//! let client = RpcClient::new(ClientConfig::new().url("http://127.0.0.1:3000/rpc").sse(true))?;
//!
//! let greeting: String = client
//!     .rpc("components/chat_server/login")
//!     .invoke(vec![json!("ada")])
//!     .await?;
//!
//! let messages: RpcStream<String> = client
//!     .rpc("components/chat_server/messages")
//!     .invoke(vec![])
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod stream;
mod subscription;

pub use lifecycle::Lifecycle;
pub use stream::{RpcStream, StreamReply, ABORTED};
pub use subscription::Subscription;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{Json, JsonCodec};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::procedure::id::{hashed_id, plain_id};
use crate::procedure::RpcError;
use crate::protocol::EVENT_STREAM_CONTENT_TYPE;

/// Non-2xx response from the server.
///
/// The body is read eagerly so the error can be inspected after the
/// connection is gone.
#[derive(Debug, Clone, Error)]
#[error("RPC request failed: {status}")]
pub struct RpcClientError {
    /// Response status.
    pub status: StatusCode,
    /// Canonical reason phrase of the status, if any.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
}

impl RpcClientError {
    async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }

    /// Body decoded as JSON, if it is JSON.
    pub fn payload(&self) -> Option<Value> {
        JsonCodec::decode(&self.body).ok()
    }

    /// The server-side error kind this response was produced from, if it
    /// follows the status mapping.
    pub fn rpc_error(&self) -> Option<RpcError> {
        let payload = self.payload();
        let message = payload.as_ref().and_then(Value::as_str);
        let matches = |err: &RpcError| message == Some(err.to_string().as_str());

        match self.status {
            StatusCode::BAD_REQUEST if matches(&RpcError::InvalidRequestBody) => {
                Some(RpcError::InvalidRequestBody)
            }
            StatusCode::BAD_REQUEST if matches(&RpcError::Validation(None)) => {
                Some(RpcError::Validation(None))
            }
            StatusCode::BAD_REQUEST => Some(RpcError::Validation(payload)),
            StatusCode::UNAUTHORIZED => Some(RpcError::Unauthorized),
            StatusCode::FORBIDDEN => Some(RpcError::Forbidden),
            StatusCode::NOT_FOUND if matches(&RpcError::ProcedureNotFound) => {
                Some(RpcError::ProcedureNotFound)
            }
            StatusCode::INTERNAL_SERVER_ERROR => message.map(RpcError::new),
            _ => None,
        }
    }
}

/// Decoded response of a procedure call.
pub enum Reply {
    /// 204, no value.
    Empty,
    /// JSON value.
    Value(Value),
    /// Event stream.
    Stream(StreamReply),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => f.write_str("Empty"),
            Reply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reply::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
        }
    }
}

/// Conversion from a [`Reply`] into the type a caller expects.
pub trait FromReply: Sized {
    /// Convert, failing when the reply has a different shape.
    fn from_reply(reply: Reply) -> Result<Self>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> Result<Self> {
        Ok(reply)
    }
}

impl FromReply for () {
    fn from_reply(reply: Reply) -> Result<Self> {
        match reply {
            Reply::Empty | Reply::Value(Value::Null) => Ok(()),
            _ => Err(Error::UnexpectedReply {
                expected: "no content",
            }),
        }
    }
}

impl FromReply for Value {
    fn from_reply(reply: Reply) -> Result<Self> {
        match reply {
            Reply::Empty => Ok(Value::Null),
            Reply::Value(value) => Ok(value),
            Reply::Stream(_) => Err(Error::UnexpectedReply {
                expected: "a JSON value",
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(reply: Reply) -> Result<T> {
    JsonCodec::from_value(Value::from_reply(reply)?)
}

impl<T: DeserializeOwned> FromReply for Json<T> {
    fn from_reply(reply: Reply) -> Result<Self> {
        decode(reply).map(Json)
    }
}

impl<T: DeserializeOwned> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> Result<Self> {
        decode(reply)
    }
}

impl<T: DeserializeOwned> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> Result<Self> {
        decode(reply)
    }
}

macro_rules! impl_from_reply_decode {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromReply for $ty {
                fn from_reply(reply: Reply) -> Result<Self> {
                    decode(reply)
                }
            }
        )*
    };
}

impl_from_reply_decode!(
    String, bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
);

impl<T> FromReply for RpcStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn from_reply(reply: Reply) -> Result<Self> {
        match reply {
            Reply::Stream(stream) => Ok(stream.into_stream()),
            _ => Err(Error::UnexpectedReply {
                expected: "an event stream",
            }),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    base_url: String,
    lifecycle: Arc<Lifecycle>,
}

/// Client for one RPC endpoint.
///
/// Cheap to clone; clones share the connection pool, cookie store and
/// shutdown hooks.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Create a client with its own HTTP client.
    ///
    /// A cookie store is kept unless credentials are [`Omit`](crate::config::Credentials::Omit).
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(config.credentials.uses_cookies())
            .build()?;
        Ok(Self::with_http_client(config, http))
    }

    /// Create a client around an existing HTTP client.
    pub fn with_http_client(config: ClientConfig, http: reqwest::Client) -> Self {
        let base_url = config.url.trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(Inner {
                http,
                config,
                base_url,
                lifecycle: Arc::new(Lifecycle::new()),
            }),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Handle for the procedure with `procedure_id`.
    pub fn rpc(&self, procedure_id: impl Into<String>) -> RemoteProcedure {
        RemoteProcedure {
            client: self.clone(),
            procedure_id: procedure_id.into(),
        }
    }

    /// Id for `name` exported from `path`, hashed or plain per configuration.
    pub fn procedure_id(&self, path: &str, name: &str) -> String {
        if self.inner.config.resolved_hash_paths() {
            hashed_id(path, name)
        } else {
            plain_id(path, name)
        }
    }

    /// Handle for `name` exported from `path`.
    pub fn procedure(&self, path: &str, name: &str) -> RemoteProcedure {
        self.rpc(self.procedure_id(path, name))
    }

    /// Number of streams still open.
    pub fn open_streams(&self) -> usize {
        self.inner.lifecycle.len()
    }

    /// Abort every open stream. Returns how many were aborted.
    pub fn shutdown(&self) -> usize {
        self.inner.lifecycle.abort_all()
    }

    /// Abort every open stream when the process receives Ctrl-C.
    pub fn shutdown_on_ctrl_c(&self) -> JoinHandle<()> {
        let lifecycle = self.inner.lifecycle.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    lifecycle.abort_all();
                }
                Err(err) => warn!(error = %err, "Could not listen for Ctrl-C"),
            }
        })
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.inner.base_url)
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

/// One remote procedure.
#[derive(Clone, Debug)]
pub struct RemoteProcedure {
    client: RpcClient,
    procedure_id: String,
}

impl RemoteProcedure {
    /// Procedure id this handle posts to.
    pub fn procedure_id(&self) -> &str {
        &self.procedure_id
    }

    /// Call with positional arguments and return the decoded reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] for network failures
    /// - [`Error::Status`] for non-2xx responses
    /// - [`Error::SseDisabled`] for a stream reply when streams are disabled
    pub async fn call(&self, args: Vec<Value>) -> Result<Reply> {
        let inner = &self.client.inner;
        let url = format!("{}/{}", inner.base_url, self.procedure_id);
        let body = JsonCodec::encode(&args)?;

        debug!(procedure_id = %self.procedure_id, "Calling procedure");
        let response = inner
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcClientError::from_response(response).await?.into());
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Reply::Empty);
        }

        if is_event_stream(response.headers()) {
            if !inner.config.sse {
                return Err(Error::SseDisabled);
            }
            return Ok(Reply::Stream(StreamReply::new(
                response,
                inner.lifecycle.clone(),
                inner.config.stream_capacity,
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Reply::Value(Value::Null));
        }
        Ok(Reply::Value(JsonCodec::decode(&bytes)?))
    }

    /// Call and convert the reply into `R`.
    pub async fn invoke<R: FromReply>(&self, args: Vec<Value>) -> Result<R> {
        R::from_reply(self.call(args).await?)
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn client_error(status: StatusCode, body: &str) -> RpcClientError {
        RpcClientError {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_client_error_payload() {
        let err = client_error(StatusCode::FORBIDDEN, r#""Forbidden""#);
        assert_eq!(err.payload(), Some(json!("Forbidden")));
        assert_eq!(err.to_string(), "RPC request failed: 403 Forbidden");

        let err = client_error(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.payload(), None);
    }

    #[test]
    fn test_client_error_kind() {
        let cases = [
            (StatusCode::BAD_REQUEST, r#""Invalid request body""#, Some(RpcError::InvalidRequestBody)),
            (StatusCode::BAD_REQUEST, r#""Validation error""#, Some(RpcError::Validation(None))),
            (
                StatusCode::BAD_REQUEST,
                r#"{"field":"name"}"#,
                Some(RpcError::Validation(Some(json!({"field": "name"})))),
            ),
            (StatusCode::UNAUTHORIZED, r#""Unauthorized""#, Some(RpcError::Unauthorized)),
            (StatusCode::NOT_FOUND, r#""Unknown procedure""#, Some(RpcError::ProcedureNotFound)),
            (StatusCode::NOT_FOUND, "<html>", None),
            (StatusCode::INTERNAL_SERVER_ERROR, r#""boom""#, Some(RpcError::new("boom"))),
            (StatusCode::INTERNAL_SERVER_ERROR, "", None),
        ];

        for (status, body, expected) in cases {
            assert_eq!(client_error(status, body).rpc_error(), expected, "{status} {body}");
        }
    }

    #[test]
    fn test_from_reply_shapes() {
        assert!(<()>::from_reply(Reply::Empty).is_ok());
        assert_eq!(Value::from_reply(Reply::Empty).unwrap(), Value::Null);
        assert_eq!(
            String::from_reply(Reply::Value(json!("hi"))).unwrap(),
            "hi"
        );
        assert_eq!(
            Option::<u32>::from_reply(Reply::Value(Value::Null)).unwrap(),
            None
        );
        assert_eq!(
            Vec::<u32>::from_reply(Reply::Value(json!([1, 2]))).unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            <()>::from_reply(Reply::Value(json!(1))),
            Err(Error::UnexpectedReply { .. })
        ));
        assert!(matches!(
            u32::from_reply(Reply::Value(json!("x"))),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_is_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!is_event_stream(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        assert!(is_event_stream(&headers));

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_event_stream(&headers));
    }

    #[test]
    fn test_procedure_ids_follow_hash_setting() {
        let plain = RpcClient::new(ClientConfig::new().hash_paths(false)).unwrap();
        assert_eq!(plain.procedure_id("foo/bar.rs", "baz"), "foo/bar/baz");

        let hashed = RpcClient::new(ClientConfig::new().hash_paths(true)).unwrap();
        assert_eq!(hashed.procedure_id("foo/bar.rs", "baz"), "zF1GvbSZHG6uPrc5/baz");
        assert_eq!(
            hashed.procedure("foo/bar.rs", "baz").procedure_id(),
            "zF1GvbSZHG6uPrc5/baz"
        );
    }

    #[test]
    fn test_trailing_slash_in_url() {
        let client = RpcClient::new(ClientConfig::new().url("http://localhost/rpc/")).unwrap();
        assert_eq!(client.inner.base_url, "http://localhost/rpc");
        assert_eq!(client.open_streams(), 0);
    }
}
