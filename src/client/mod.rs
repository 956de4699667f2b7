//! HTTP client for the relay server.
//!
//! - [`reader`]: incremental frame decoding for streamed answers

pub mod reader;

use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::chat::{ChatRequest, ChatResponse, ErrorBody};

pub use reader::{Callbacks, FrameHandler, FrameReader, ReaderState};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error occurred: {0}")]
    Http(#[from] reqwest::Error),
}

/// One entry of the model catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub input: String,
    pub output: String,
    pub provider: String,
}

#[derive(Debug, Deserialize)]
struct ModelCatalog {
    models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
    #[serde(default)]
    pub timestamp: String,
    pub uptime_secs: u64,
}

pub struct RelayClient {
    http: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn models(&self) -> Result<Vec<ModelEntry>, ClientError> {
        let response = self.http.get(self.url("/api/models")).send().await?;
        let catalog: ModelCatalog = json_or_error(response).await?;
        Ok(catalog.models)
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self.http.get(self.url("/api/health")).send().await?;
        json_or_error(response).await
    }

    /// Non-streaming exchange.
    pub async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let mut request = request.clone();
        request.stream = false;
        let response = self
            .http
            .post(self.url("/api/chat/completions"))
            .json(&request)
            .send()
            .await?;
        json_or_error(response).await
    }

    /// Streamed exchange. Every outcome, including HTTP and transport
    /// failures, is reported through `handler`, which is handed back.
    pub async fn send_message_stream<H: FrameHandler>(&self, request: &ChatRequest, handler: H) -> H {
        let mut reader = FrameReader::new(handler);
        let mut request = request.clone();
        request.stream = true;

        let response = match self
            .http
            .post(self.url("/api/chat/completions"))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                reader.fail(&ClientError::Http(e).to_string());
                return reader.into_handler();
            }
        };

        if !response.status().is_success() {
            let err = api_error(response).await;
            reader.fail(&err.to_string());
            return reader.into_handler();
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if reader.push(&bytes) != ReaderState::Receiving {
                        break;
                    }
                }
                Err(e) => {
                    reader.fail(&ClientError::Http(e).to_string());
                    break;
                }
            }
        }

        if reader.state() == ReaderState::Receiving {
            reader.close();
        }
        debug!(state = ?reader.state(), "Stream finished");
        reader.into_handler()
    }
}

async fn json_or_error<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    Ok(response.json().await?)
}

/// Build an error from a non-2xx response, preferring the server's `error` text.
async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {status}"),
    };
    ClientError::Api { status, message }
}
