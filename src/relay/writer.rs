//! Relay writer: owns the client-facing response of one streaming request.
//!
//! The first event is pulled before anything is committed, so an upstream
//! failure that happens before any delta can still be answered with a
//! proper error status. Once headers are out, a failure ends the body
//! without the `[DONE]` sentinel; frames already written still reach the
//! client, which treats the missing sentinel as an incomplete stream.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::{RelayMetrics, StreamOutcome};
use crate::relay::adapter::EventStream;
use crate::relay::codec::{encode, LogicalEvent};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Error, Debug)]
pub enum RelayError {
    /// Upstream failed before anything was written.
    #[error("Upstream stream failed: {0}")]
    StreamFailure(String),

    #[error("Upstream stream ended without a terminal event")]
    Truncated,
}

/// Relay an event stream as an SSE response.
///
/// Returns `Err` only when the stream fails before its first event, in which
/// case no header has been committed.
pub async fn relay(
    mut events: EventStream,
    request_id: String,
    metrics: RelayMetrics,
) -> Result<Response, RelayError> {
    let first = match events.next().await {
        Some(LogicalEvent::Failure { message }) => {
            metrics.record_stream(StreamOutcome::Rejected);
            warn!(request_id, "Stream failed before first byte: {message}");
            return Err(RelayError::StreamFailure(message));
        }
        Some(event) => event,
        None => {
            metrics.record_stream(StreamOutcome::Rejected);
            return Err(RelayError::Truncated);
        }
    };

    debug!(request_id, "Committing event-stream headers");

    let frames = async_stream::stream! {
        let mut guard = StreamGuard::new(request_id, metrics);
        let mut events = futures::stream::iter([first]).chain(events);

        while let Some(event) = events.next().await {
            if let LogicalEvent::Failure { message } = event {
                warn!(request_id = guard.request_id, "Upstream failed mid-stream: {message}");
                guard.finish(StreamOutcome::Failed);
                return;
            }

            let terminal = event.is_terminal();
            if terminal {
                guard.finish(StreamOutcome::Completed);
            } else {
                guard.deltas += 1;
            }
            if let Some(frame) = encode(&event) {
                yield Ok::<_, Infallible>(frame);
            }
            if terminal {
                return;
            }
        }

        warn!(request_id = guard.request_id, "{}", RelayError::Truncated);
        guard.finish(StreamOutcome::Failed);
    };

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));

    Ok(response)
}

/// Records exactly one outcome per stream. Dropped unfinished means the
/// client disconnected and the body (with the upstream stream) was released.
struct StreamGuard {
    request_id: String,
    metrics: RelayMetrics,
    deltas: usize,
    outcome: Option<StreamOutcome>,
}

impl StreamGuard {
    fn new(request_id: String, metrics: RelayMetrics) -> Self {
        Self {
            request_id,
            metrics,
            deltas: 0,
            outcome: None,
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if self.outcome.is_some() {
            return;
        }
        self.outcome = Some(outcome);
        self.metrics.record_stream(outcome);
        match outcome {
            StreamOutcome::Completed => {
                info!(request_id = self.request_id, deltas = self.deltas, "Stream complete")
            }
            _ => warn!(
                request_id = self.request_id,
                deltas = self.deltas,
                outcome = outcome.as_str(),
                "Stream terminated without sentinel"
            ),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.metrics.record_stream(StreamOutcome::Disconnected);
            info!(
                request_id = self.request_id,
                deltas = self.deltas,
                "Client disconnected; upstream stream released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn events(items: Vec<LogicalEvent>) -> EventStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_complete_stream_writes_frames_in_order() {
        let metrics = RelayMetrics::new().unwrap();
        let response = relay(
            events(vec![
                LogicalEvent::delta("He"),
                LogicalEvent::delta("llo"),
                LogicalEvent::completion(),
            ]),
            "req-1".to_string(),
            metrics.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            &body[..],
            b"data: {\"response\":\"He\"}\n\ndata: {\"response\":\"llo\"}\n\ndata: [DONE]\n\n"
        );
        assert_eq!(metrics.stream_count(StreamOutcome::Completed), 1);
    }

    #[tokio::test]
    async fn test_failure_before_first_byte_is_rejected() {
        let metrics = RelayMetrics::new().unwrap();
        let result = relay(
            events(vec![LogicalEvent::failure("upstream 503")]),
            "req-2".to_string(),
            metrics.clone(),
        )
        .await;

        assert!(matches!(result, Err(RelayError::StreamFailure(m)) if m == "upstream 503"));
        assert_eq!(metrics.stream_count(StreamOutcome::Rejected), 1);
    }

    #[tokio::test]
    async fn test_failure_after_commit_ends_without_sentinel() {
        let metrics = RelayMetrics::new().unwrap();
        let response = relay(
            events(vec![
                LogicalEvent::delta("He"),
                LogicalEvent::failure("reset"),
                LogicalEvent::delta("never"),
            ]),
            "req-3".to_string(),
            metrics.clone(),
        )
        .await
        .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"data: {\"response\":\"He\"}\n\n");

        assert_eq!(metrics.stream_count(StreamOutcome::Failed), 1);
        assert_eq!(metrics.stream_count(StreamOutcome::Completed), 0);
    }

    #[tokio::test]
    async fn test_stream_without_terminal_is_truncated() {
        let metrics = RelayMetrics::new().unwrap();
        let response = relay(
            events(vec![LogicalEvent::delta("x")]),
            "req-4".to_string(),
            metrics.clone(),
        )
        .await
        .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(!body.ends_with(b"data: [DONE]\n\n"));
        assert_eq!(metrics.stream_count(StreamOutcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_disconnect_stops_pulling_upstream() {
        let metrics = RelayMetrics::new().unwrap();
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let endless = futures::stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            LogicalEvent::delta("tick")
        });

        let response = relay(Box::pin(endless), "req-5".to_string(), metrics.clone())
            .await
            .unwrap();

        let mut body = response.into_body().into_data_stream();
        body.next().await.unwrap().unwrap();
        body.next().await.unwrap().unwrap();
        drop(body);

        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.stream_count(StreamOutcome::Disconnected), 1);
        assert_eq!(metrics.stream_count(StreamOutcome::Failed), 0);
    }
}
