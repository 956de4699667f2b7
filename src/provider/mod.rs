//! Upstream text-generation provider.
//!
//! - [`chunk`]: provider payload shapes and delta extraction
//! - [`llama_api`]: HTTP implementation against the Llama API

pub mod chunk;
pub mod llama_api;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::chat::{ChatMessage, Metric};

pub use chunk::ProviderChunk;

/// Lazy, finite, non-restartable sequence of provider chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, ProviderError>> + Send>>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        kind: Option<String>,
    },

    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed provider response: {0}")]
    Decode(String),

    #[error("Provider stream interrupted: {0}")]
    Stream(String),
}

impl ProviderError {
    /// HTTP status to forward to the caller.
    pub fn status(&self) -> u16 {
        match self {
            ProviderError::Api { status, .. } => *status,
            _ => 500,
        }
    }
}

/// Request body sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// A materialized single-shot answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCompletion {
    pub content: String,
    pub id: Option<String>,
    pub metrics: Option<Vec<Metric>>,
}

/// Capability exposed by an upstream provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Blocking request/response exchange.
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion, ProviderError>;

    /// Open a chunk stream. Errors here happen before any chunk is produced.
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError>;
}
