//! End-to-end tests: scripted provider → relay server → RelayClient.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpListener;

use llama_relay::chat::{ChatMessage, ChatRequest, Metric};
use llama_relay::client::{ClientError, FrameHandler, RelayClient};
use llama_relay::config::{Config, ServerConfig};
use llama_relay::metrics::{RelayMetrics, StreamOutcome};
use llama_relay::provider::{
    ChunkStream, Provider, ProviderChunk, ProviderCompletion, ProviderError, ProviderRequest,
};
use llama_relay::relay::UpstreamAdapter;
use llama_relay::server::{build_router, AppState};

#[derive(Clone)]
enum Step {
    Delta(&'static str),
    Noise,
    Fail(&'static str),
}

/// Provider that replays a fixed script and counts how often it is called.
struct ScriptedProvider {
    answer: &'static str,
    script: Vec<Step>,
    open_error: Option<u16>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Step>) -> Self {
        Self {
            answer: "Hello! How can I help?",
            script,
            open_error: None,
            calls: AtomicUsize::new(0),
        }
    }
}

fn delta_chunk(text: &str) -> ProviderChunk {
    serde_json::from_value(serde_json::json!({
        "id": "gen-42",
        "event": {"event_type": "progress", "delta": {"type": "text", "text": text}}
    }))
    .unwrap()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderCompletion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderCompletion {
            content: self.answer.to_string(),
            id: Some("resp-1".to_string()),
            metrics: Some(vec![Metric {
                name: "num_completion_tokens".to_string(),
                value: 7.0,
                unit: Some("tokens".to_string()),
            }]),
        })
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.open_error {
            return Err(ProviderError::Api {
                status,
                message: "upstream unavailable".to_string(),
                kind: Some("InternalServerError".to_string()),
            });
        }

        let steps = self.script.clone();
        let chunks = futures::stream::iter(steps).then(|step| async move {
            // Give each chunk its own write so the client sees real fragmentation.
            tokio::time::sleep(Duration::from_millis(5)).await;
            match step {
                Step::Delta(text) => Ok(delta_chunk(text)),
                Step::Noise => Ok(serde_json::from_str(r#"{"event":{"event_type":"start"}}"#).unwrap()),
                Step::Fail(message) => Err(ProviderError::Stream(message.to_string())),
            }
        });
        Ok(Box::pin(chunks))
    }
}

struct TestServer {
    base_url: String,
    provider: Arc<ScriptedProvider>,
    metrics: RelayMetrics,
}

async fn spawn_server(provider: ScriptedProvider) -> TestServer {
    let provider = Arc::new(provider);
    let metrics = RelayMetrics::new().unwrap();
    let config = Config {
        server: ServerConfig {
            static_dir: "does-not-exist".into(),
            ..ServerConfig::default()
        },
        ..Config::default()
    };

    let state = Arc::new(AppState {
        adapter: UpstreamAdapter::new(provider.clone()),
        config: Arc::new(config),
        metrics: metrics.clone(),
        start_time: Instant::now(),
    });
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        provider,
        metrics,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Chunk(String),
    Complete,
    Error(String),
}

#[derive(Default)]
struct Recorder(Vec<Seen>);

impl FrameHandler for Recorder {
    fn on_chunk(&mut self, text: &str) {
        self.0.push(Seen::Chunk(text.to_string()));
    }
    fn on_complete(&mut self) {
        self.0.push(Seen::Complete);
    }
    fn on_error(&mut self, message: &str) {
        self.0.push(Seen::Error(message.to_string()));
    }
}

fn hi() -> ChatRequest {
    ChatRequest::new(vec![ChatMessage::user("Hi")])
}

#[tokio::test]
async fn test_non_streaming_answer() {
    let server = spawn_server(ScriptedProvider::new(vec![])).await;
    let client = RelayClient::new(&server.base_url);

    let response = client.send_message(&hi()).await.unwrap();

    assert_eq!(response.completion_message.content, "Hello! How can I help?");
    assert_eq!(response.id.as_deref(), Some("resp-1"));
    assert_eq!(response.metrics.unwrap()[0].value, 7.0);
}

#[tokio::test]
async fn test_non_streaming_wire_shape() {
    let server = spawn_server(ScriptedProvider::new(vec![])).await;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/chat/completions", server.base_url))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "Hi"}], "stream": false}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["completion_message"]["role"], "assistant");
    assert_eq!(body["completion_message"]["content"], "Hello! How can I help?");
    assert_eq!(body["metrics"][0]["metric"], "num_completion_tokens");
}

#[tokio::test]
async fn test_streaming_deltas_then_completion() {
    let server = spawn_server(ScriptedProvider::new(vec![
        Step::Noise,
        Step::Delta("He"),
        Step::Delta("llo"),
    ]))
    .await;
    let client = RelayClient::new(&server.base_url);

    let seen = client.send_message_stream(&hi(), Recorder::default()).await.0;

    assert_eq!(
        seen,
        vec![
            Seen::Chunk("He".to_string()),
            Seen::Chunk("llo".to_string()),
            Seen::Complete,
        ]
    );
    assert_eq!(server.metrics.stream_count(StreamOutcome::Completed), 1);
}

#[tokio::test]
async fn test_streaming_raw_frames() {
    let server = spawn_server(ScriptedProvider::new(vec![Step::Delta("He"), Step::Delta("llo")])).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/chat/completions", server.base_url))
        .json(&hi().with_stream(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        "data: {\"response\":\"He\"}\n\ndata: {\"response\":\"llo\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_failure_after_first_delta() {
    let server = spawn_server(ScriptedProvider::new(vec![
        Step::Delta("He"),
        Step::Fail("connection reset by provider"),
        Step::Delta("never"),
    ]))
    .await;
    let client = RelayClient::new(&server.base_url);

    let seen = client.send_message_stream(&hi(), Recorder::default()).await.0;

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], Seen::Chunk("He".to_string()));
    assert!(matches!(seen[1], Seen::Error(_)));
    assert!(!seen.contains(&Seen::Complete));
    assert_eq!(server.metrics.stream_count(StreamOutcome::Failed), 1);
}

#[tokio::test]
async fn test_failure_before_first_delta_is_an_error_response() {
    let server = spawn_server(ScriptedProvider::new(vec![Step::Noise, Step::Fail("boom")])).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/chat/completions", server.base_url))
        .json(&hi().with_stream(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Upstream stream failed");
    assert!(body["message"].as_str().unwrap().contains("boom"));
    assert_eq!(server.metrics.stream_count(StreamOutcome::Rejected), 1);
}

#[tokio::test]
async fn test_provider_open_error_is_forwarded() {
    let mut provider = ScriptedProvider::new(vec![]);
    provider.open_error = Some(503);
    let server = spawn_server(provider).await;
    let client = RelayClient::new(&server.base_url);

    let seen = client
        .send_message_stream(&hi(), Recorder::default())
        .await
        .0;
    assert_eq!(seen, vec![Seen::Error("upstream unavailable".to_string())]);
}

#[tokio::test]
async fn test_empty_messages_rejected_before_provider() {
    let server = spawn_server(ScriptedProvider::new(vec![Step::Delta("x")])).await;
    let client = RelayClient::new(&server.base_url);

    let err = client
        .send_message(&ChatRequest::new(vec![]))
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Messages array is required and cannot be empty");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let seen = client
        .send_message_stream(&ChatRequest::new(vec![]), Recorder::default())
        .await
        .0;
    assert_eq!(
        seen,
        vec![Seen::Error("Messages array is required and cannot be empty".to_string())]
    );

    assert_eq!(server.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let server = spawn_server(ScriptedProvider::new(vec![])).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/chat/completions", server.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(server.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_streams_are_independent() {
    let server = spawn_server(ScriptedProvider::new(vec![
        Step::Delta("a"),
        Step::Delta("b"),
        Step::Delta("c"),
    ]))
    .await;
    let client = Arc::new(RelayClient::new(&server.base_url));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.send_message_stream(&hi(), Recorder::default()).await.0 })
        })
        .collect();

    for handle in handles {
        let seen = handle.await.unwrap();
        assert_eq!(
            seen,
            vec![
                Seen::Chunk("a".to_string()),
                Seen::Chunk("b".to_string()),
                Seen::Chunk("c".to_string()),
                Seen::Complete,
            ]
        );
    }
    assert_eq!(server.metrics.stream_count(StreamOutcome::Completed), 4);
}

#[tokio::test]
async fn test_models_and_health() {
    let server = spawn_server(ScriptedProvider::new(vec![])).await;
    let client = RelayClient::new(&server.base_url);

    let models = client.models().await.unwrap();
    assert_eq!(models.len(), 6);
    assert!(models.iter().any(|m| m.id == "Llama-4-Maverick-17B-128E-Instruct-FP8"));

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "llama-relay");
    let stamp = chrono::DateTime::parse_from_rfc3339(&health.timestamp).unwrap();
    assert_eq!(stamp.offset().local_minus_utc(), 0);
    assert!(health.timestamp.ends_with('Z'));
}
