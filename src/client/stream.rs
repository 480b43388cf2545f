//! Client side of event-stream replies.
//!
//! ```text
//! reqwest body ─► SseBuffer ─► skip `connected` ─► JSON decode ─► Controller
//!      ▲                          `error` → StreamError                │
//!      └── dropped when the token is cancelled ◄── RpcStream cancel/drop ┘
//! ```
//!
//! The pump task owns the response body; returning from it drops the body,
//! which aborts the HTTP request and lets the server cancel its producer.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Lifecycle;
use crate::protocol::SseBuffer;
use crate::stream::{Controller, EventStream, StreamError};

/// Message of the error delivered when a stream is aborted by shutdown.
pub const ABORTED: &str = "aborted";

/// Cancels the request and removes its shutdown hook, once.
struct AbortGuard {
    token: CancellationToken,
    lifecycle: Arc<Lifecycle>,
    hook_id: u64,
}

impl AbortGuard {
    fn new(lifecycle: Arc<Lifecycle>) -> Self {
        let token = CancellationToken::new();
        let hook_id = lifecycle.register(token.clone());
        Self {
            token,
            lifecycle,
            hook_id,
        }
    }

    fn release(&self) {
        self.token.cancel();
        self.lifecycle.deregister(self.hook_id);
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// An event-stream reply whose item type is not chosen yet.
///
/// The request stays registered for shutdown from the moment the reply
/// arrives; reading starts once the typed stream is first polled.
pub struct StreamReply {
    response: reqwest::Response,
    guard: Arc<AbortGuard>,
    capacity: usize,
}

impl StreamReply {
    pub(crate) fn new(
        response: reqwest::Response,
        lifecycle: Arc<Lifecycle>,
        capacity: usize,
    ) -> Self {
        Self {
            response,
            guard: Arc::new(AbortGuard::new(lifecycle)),
            capacity,
        }
    }

    /// Decode stream values as `T`.
    pub fn into_stream<T>(self) -> RpcStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let StreamReply {
            response,
            guard,
            capacity,
        } = self;
        let token = guard.token.clone();
        let cleanup_guard = guard.clone();

        let inner = EventStream::with_capacity(capacity, move |controller| {
            tokio::spawn(pump(response, controller, token));
            move || cleanup_guard.release()
        });

        RpcStream { inner, guard }
    }
}

impl fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReply")
            .field("url", &self.response.url().as_str())
            .finish()
    }
}

/// Stream of values received as Server-Sent Events.
///
/// Ends after the server closes the stream, or with one error when the
/// server reports a failure or the connection breaks. Dropping it (or
/// calling [`cancel`](Self::cancel)) aborts the request.
pub struct RpcStream<T> {
    inner: EventStream<T>,
    guard: Arc<AbortGuard>,
}

impl<T: Send + 'static> RpcStream<T> {
    /// Stop reading and abort the request.
    pub fn cancel(self) {
        let RpcStream { inner, guard } = self;
        inner.cancel();
        guard.release();
    }

    /// Whether the request was aborted.
    pub fn is_aborted(&self) -> bool {
        self.guard.token.is_cancelled()
    }
}

impl<T: Send + 'static> Stream for RpcStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> Unpin for RpcStream<T> {}

impl<T> fmt::Debug for RpcStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcStream")
            .field("aborted", &self.guard.token.is_cancelled())
            .finish()
    }
}

async fn pump<T>(response: reqwest::Response, controller: Controller<T>, token: CancellationToken)
where
    T: DeserializeOwned + Send + 'static,
{
    let mut body = response.bytes_stream();
    let mut buffer = SseBuffer::new();

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                controller.error(ABORTED);
                return;
            }
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            None => {
                debug!("Event stream ended");
                controller.close();
                return;
            }
            Some(Err(err)) => {
                controller.error(err.to_string());
                return;
            }
            Some(Ok(bytes)) => bytes,
        };

        let events = match buffer.push(&bytes) {
            Ok(events) => events,
            Err(err) => {
                controller.error(err.to_string());
                return;
            }
        };

        for event in events {
            if event.is_connected() {
                continue;
            }
            if event.is_error() {
                controller.error(event.data);
                return;
            }

            let value = match serde_json::from_str::<T>(&event.data) {
                Ok(value) => value,
                Err(err) => {
                    controller.error(format!("Invalid stream value: {err}"));
                    return;
                }
            };

            tokio::select! {
                _ = token.cancelled() => {
                    controller.error(ABORTED);
                    return;
                }
                sent = controller.enqueue(value) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
