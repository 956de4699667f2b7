//! Llama API provider over HTTP.
//!
//! Both calls hit `POST {base_url}/chat/completions`. The streaming call
//! reads the response body as Server-Sent Events:
//! ```text
//! data: {"event":{"event_type":"progress","delta":{"type":"text","text":"He"}}}
//!
//! data: [DONE]
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::provider::chunk::{error_text, CompletionPayload, ProviderChunk};
use crate::provider::{ChunkStream, Provider, ProviderCompletion, ProviderError, ProviderRequest};

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

pub struct LlamaApiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl LlamaApiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        // No overall timeout on the client: a stream lives as long as the provider keeps talking.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        if config.api_key.is_none() {
            warn!("No provider API key configured; upstream calls will be unauthenticated");
        }

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn post(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        let builder = self.client.post(&self.endpoint).json(request);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for LlamaApiProvider {
    fn name(&self) -> &str {
        "llama-api"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion, ProviderError> {
        let response = self.post(request).timeout(self.request_timeout).send().await?;
        let response = check_status(response).await?;

        let body = response.bytes().await?;
        let payload: CompletionPayload = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let (content, id, metrics) = payload.into_parts();

        Ok(ProviderCompletion { content, id, metrics })
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let response = self
            .post(request)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(Box::pin(parse_sse_chunks(response.bytes_stream())))
    }
}

/// Turn a non-2xx response into [`ProviderError::Api`].
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

fn api_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value.get("error") {
            Some(error) => Some(error_text(error)),
            None => value
                .get("detail")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("{status} status code (no body)")
            } else {
                format!("{status} {}", body.trim())
            }
        });

    let kind = match status.as_u16() {
        400 => "BadRequestError",
        401 => "AuthenticationError",
        403 => "PermissionDeniedError",
        404 => "NotFoundError",
        409 => "ConflictError",
        422 => "UnprocessableEntityError",
        429 => "RateLimitError",
        s if s >= 500 => "InternalServerError",
        _ => "APIError",
    };

    ProviderError::Api {
        status: status.as_u16(),
        message,
        kind: Some(kind.to_string()),
    }
}

/// Parse an SSE byte stream into provider chunks.
///
/// Lines are split on raw bytes so multi-byte characters may straddle
/// network chunks. `[DONE]`, comments and unparseable payloads are skipped.
pub fn parse_sse_chunks<S, E>(byte_stream: S) -> impl Stream<Item = Result<ProviderChunk, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut line_buf: Vec<u8> = Vec::new();

        // A last line without its newline is dropped at close, as SSE requires.
        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    yield Err(ProviderError::Stream(e.to_string()));
                    return;
                }
            };
            line_buf.extend_from_slice(&chunk);

            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim_end().strip_prefix(SSE_DATA_PREFIX) else {
                    continue;
                };
                let data = data.trim_start();
                if data.is_empty() || data == SSE_DONE {
                    continue;
                }

                match serde_json::from_str::<ProviderChunk>(data) {
                    Ok(chunk) => {
                        if let Some(message) = chunk.error_message() {
                            yield Err(ProviderError::Stream(message));
                            return;
                        }
                        yield Ok(chunk);
                    }
                    Err(e) => debug!("Skipping unparseable provider chunk: {e}"),
                }
            }
        }
    }
}
