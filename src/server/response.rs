//! Mapping from procedure outcomes and errors to HTTP responses.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{stream, StreamExt};
use tracing::warn;

use crate::procedure::{Outcome, RpcError};
use crate::protocol::{SseEvent, EVENT_STREAM_CONTENT_TYPE};
use crate::stream::ValueStream;

/// HTTP status for an RPC error kind.
pub fn http_status(err: &RpcError) -> StatusCode {
    match err {
        RpcError::InvalidRequestBody | RpcError::Validation(_) => StatusCode::BAD_REQUEST,
        RpcError::Unauthorized => StatusCode::UNAUTHORIZED,
        RpcError::Forbidden => StatusCode::FORBIDDEN,
        RpcError::ProcedureNotFound => StatusCode::NOT_FOUND,
        RpcError::Generic(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status plus JSON payload.
pub fn error_response(err: &RpcError) -> Response {
    (http_status(err), axum::Json(err.to_payload())).into_response()
}

/// Bare 500 with no body.
pub fn internal_error() -> Response {
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Response for a successful procedure.
pub fn outcome_response(outcome: Outcome, procedure_id: &str) -> Response {
    match outcome {
        Outcome::Empty => StatusCode::NO_CONTENT.into_response(),
        Outcome::Value(value) => (StatusCode::OK, axum::Json(value)).into_response(),
        Outcome::Stream(values) => sse_response(values, procedure_id.to_string()),
    }
}

/// Event-stream response: `connected`, one event per value, optional `error`.
///
/// Dropping the body (client disconnect) drops `values`, which cancels the
/// producer.
fn sse_response(values: ValueStream, procedure_id: String) -> Response {
    let frames = stream::once(async { SseEvent::connected().encode() }).chain(stream::unfold(
        Some(values),
        move |state| {
            let procedure_id = procedure_id.clone();
            async move {
                let mut values = state?;
                match values.next().await? {
                    Ok(value) => {
                        let frame = match SseEvent::json(&value) {
                            Ok(event) => event.encode(),
                            Err(err) => {
                                warn!(%procedure_id, error = %err, "Stream value failed to encode");
                                return Some((SseEvent::error(err.to_string()).encode(), None));
                            }
                        };
                        Some((frame, Some(values)))
                    }
                    Err(err) => {
                        warn!(%procedure_id, error = %err, "Event stream failed");
                        Some((SseEvent::error(err.message()).encode(), None))
                    }
                }
            }
        },
    ));

    let body = Body::from_stream(frames.map(Ok::<Bytes, Infallible>));
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventStream;
    use serde_json::json;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(http_status(&RpcError::InvalidRequestBody), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(&RpcError::Validation(None)), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(&RpcError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(http_status(&RpcError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(http_status(&RpcError::ProcedureNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            http_status(&RpcError::new("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(&RpcError::validation(json!({"field": "name"})));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, r#"{"field":"name"}"#);

        let response = error_response(&RpcError::Unauthorized);
        assert_eq!(body_text(response).await, r#""Unauthorized""#);
    }

    #[tokio::test]
    async fn test_empty_and_value() {
        let response = outcome_response(Outcome::Empty, "a/b");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = outcome_response(Outcome::Value(json!([1, "two"])), "a/b");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"[1,"two"]"#);
    }

    #[tokio::test]
    async fn test_stream_frames() {
        let values = EventStream::new(|controller| {
            controller.try_enqueue("hello").unwrap();
            controller.try_enqueue("world").unwrap();
            controller.close();
            || {}
        })
        .into_value_stream();

        let response = outcome_response(Outcome::Stream(values), "a/b");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            EVENT_STREAM_CONTENT_TYPE
        );
        assert_eq!(
            body_text(response).await,
            "event: connected\ndata:\n\ndata: \"hello\"\n\ndata: \"world\"\n\n"
        );
    }

    #[tokio::test]
    async fn test_stream_error_frame() {
        let values = EventStream::new(|controller| {
            controller.try_enqueue(1).unwrap();
            controller.error("boom");
            || {}
        })
        .into_value_stream();

        let response = outcome_response(Outcome::Stream(values), "a/b");
        assert_eq!(
            body_text(response).await,
            "event: connected\ndata:\n\ndata: 1\n\nevent: error\ndata: boom\n\n"
        );
    }
}
