//! Upstream stream adapter.
//!
//! Turns a provider chunk stream into the canonical event sequence:
//! zero or more `Delta`s followed by exactly one `Completion` or `Failure`.
//! The single-shot path lives here too but shares nothing with streaming.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::chat::{ChatRequest, ChatResponse, CompletionMessage, Role};
use crate::provider::{ChunkStream, Provider, ProviderError, ProviderRequest};
use crate::relay::codec::LogicalEvent;

/// Canonical event stream for one request.
pub type EventStream = Pin<Box<dyn Stream<Item = LogicalEvent> + Send>>;

pub struct UpstreamAdapter {
    provider: Arc<dyn Provider>,
}

impl UpstreamAdapter {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Single request/response exchange.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let completion = self.provider.complete(&provider_request(request, false)).await?;

        Ok(ChatResponse {
            completion_message: CompletionMessage {
                content: completion.content,
                role: Role::Assistant,
            },
            id: completion.id,
            metrics: completion.metrics,
        })
    }

    /// Open the provider stream and adapt it.
    ///
    /// An error here means nothing has been produced yet.
    pub async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, ProviderError> {
        let chunks = self.provider.stream(&provider_request(request, true)).await?;
        Ok(Box::pin(adapt_chunks(chunks)))
    }
}

fn provider_request(request: &ChatRequest, stream: bool) -> ProviderRequest {
    ProviderRequest {
        messages: request.messages.clone(),
        model: request.model.clone(),
        stream,
    }
}

/// Map provider chunks to logical events.
///
/// Consumption stops at the first provider error; the chunk stream is
/// dropped right there, releasing the upstream connection.
pub fn adapt_chunks(chunks: ChunkStream) -> impl Stream<Item = LogicalEvent> + Send {
    async_stream::stream! {
        let mut chunks = chunks;
        let mut final_id: Option<String> = None;
        let mut metrics = None;
        let mut deltas = 0usize;

        while let Some(item) = chunks.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(deltas, "Provider stream failed: {e}");
                    yield LogicalEvent::Failure { message: e.to_string() };
                    return;
                }
            };

            if let Some(id) = chunk.id() {
                final_id = Some(id.to_string());
            }
            if let Some(m) = chunk.metrics() {
                metrics = Some(m);
            }

            match chunk.delta_text() {
                Some(text) if !text.is_empty() => {
                    deltas += 1;
                    yield LogicalEvent::Delta { text: text.to_string() };
                }
                _ => {}
            }
        }

        debug!(deltas, "Provider stream exhausted");
        yield LogicalEvent::Completion { final_id, metrics };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::chat::ChatMessage;
    use crate::provider::{ProviderChunk, ProviderCompletion};

    fn chunk(json: &str) -> Result<ProviderChunk, ProviderError> {
        Ok(serde_json::from_str(json).unwrap())
    }

    fn text_chunk(text: &str) -> Result<ProviderChunk, ProviderError> {
        chunk(&format!(
            r#"{{"id":"gen-1","event":{{"event_type":"progress","delta":{{"type":"text","text":{}}}}}}}"#,
            serde_json::Value::String(text.to_string())
        ))
    }

    async fn collect(items: Vec<Result<ProviderChunk, ProviderError>>) -> Vec<LogicalEvent> {
        adapt_chunks(Box::pin(futures::stream::iter(items))).collect().await
    }

    #[tokio::test]
    async fn test_deltas_then_completion() {
        let events = collect(vec![text_chunk("He"), text_chunk("llo")]).await;
        assert_eq!(
            events,
            vec![
                LogicalEvent::delta("He"),
                LogicalEvent::delta("llo"),
                LogicalEvent::Completion {
                    final_id: Some("gen-1".to_string()),
                    metrics: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_chunks_without_delta_are_skipped() {
        let events = collect(vec![
            chunk(r#"{"event":{"event_type":"start"}}"#),
            text_chunk(""),
            text_chunk("Hi"),
            chunk(r#"{"event":{"event_type":"metrics","metrics":[{"metric":"num_total_tokens","value":4}]}}"#),
            chunk(r#"{"unexpected":"shape"}"#),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], LogicalEvent::delta("Hi"));
        match &events[1] {
            LogicalEvent::Completion { metrics: Some(m), .. } => assert_eq!(m[0].value, 4.0),
            other => panic!("expected completion with metrics, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_stream_completes() {
        let events = collect(vec![]).await;
        assert_eq!(events, vec![LogicalEvent::completion()]);
    }

    #[tokio::test]
    async fn test_failure_stops_consumption() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let items = vec![
            text_chunk("He"),
            Err(ProviderError::Stream("connection reset".to_string())),
            text_chunk("never"),
        ];
        let source = futures::stream::iter(items).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let events: Vec<_> = adapt_chunks(Box::pin(source)).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], LogicalEvent::delta("He"));
        assert!(matches!(&events[1], LogicalEvent::Failure { message } if message.contains("connection reset")));
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            request: &ProviderRequest,
        ) -> Result<ProviderCompletion, ProviderError> {
            assert!(!request.stream);
            Ok(ProviderCompletion {
                content: "Hello!".to_string(),
                id: Some("resp-1".to_string()),
                metrics: None,
            })
        }

        async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
            assert!(request.stream);
            Ok(Box::pin(futures::stream::iter(vec![text_chunk("Hi")])))
        }
    }

    #[tokio::test]
    async fn test_complete_materializes_answer() {
        let adapter = UpstreamAdapter::new(Arc::new(FixedProvider));
        let request = ChatRequest::new(vec![ChatMessage::user("Hi")]);

        let response = adapter.complete(&request).await.unwrap();
        assert_eq!(response.completion_message.content, "Hello!");
        assert_eq!(response.completion_message.role, Role::Assistant);
        assert_eq!(response.id.as_deref(), Some("resp-1"));
    }

    #[tokio::test]
    async fn test_open_stream() {
        let adapter = UpstreamAdapter::new(Arc::new(FixedProvider));
        let request = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_stream(true);

        let events: Vec<_> = adapter.open_stream(&request).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }
}
