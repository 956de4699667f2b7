//! Provider payload shapes.
//!
//! The Llama API answers in its native shape, while its compatibility
//! endpoint answers in the OpenAI shape. Both are modelled as untagged
//! variants; anything else lands in a catch-all that carries no delta.

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::chat::Metric;

/// One decoded streaming payload from the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProviderChunk {
    /// In-stream error report. `"error": null` on a normal chunk is not one.
    Error {
        #[serde(deserialize_with = "non_null")]
        error: Value,
    },

    /// Native shape: `{"event": {"event_type": "progress", "delta": {...}}}`.
    Llama {
        #[serde(default)]
        id: Option<String>,
        event: LlamaEvent,
    },

    /// Compatibility shape: `{"choices": [{"delta": {"content": "..."}}]}`.
    OpenAi {
        #[serde(default)]
        id: Option<String>,
        choices: Vec<OpenAiChunkChoice>,
        #[serde(default)]
        usage: Option<OpenAiUsage>,
    },

    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlamaEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub delta: Option<LlamaDelta>,
    #[serde(default)]
    pub metrics: Option<Vec<Metric>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlamaDelta {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChunkChoice {
    #[serde(default)]
    pub delta: OpenAiDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl OpenAiUsage {
    /// Express usage in the native metric vocabulary.
    pub fn to_metrics(&self) -> Vec<Metric> {
        [
            ("num_prompt_tokens", self.prompt_tokens),
            ("num_completion_tokens", self.completion_tokens),
            ("num_total_tokens", self.total_tokens),
        ]
        .into_iter()
        .map(|(name, value)| Metric {
            name: name.to_string(),
            value: value as f64,
            unit: Some("tokens".to_string()),
        })
        .collect()
    }
}

impl ProviderChunk {
    /// Text delta carried by this chunk, if any.
    pub fn delta_text(&self) -> Option<&str> {
        match self {
            ProviderChunk::Llama { event, .. } => match &event.delta {
                Some(LlamaDelta::Text { text }) => Some(text.as_str()),
                _ => None,
            },
            ProviderChunk::OpenAi { choices, .. } => {
                choices.first().and_then(|c| c.delta.content.as_deref())
            }
            ProviderChunk::Error { .. } | ProviderChunk::Other(_) => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ProviderChunk::Llama { id, .. } | ProviderChunk::OpenAi { id, .. } => id.as_deref(),
            _ => None,
        }
    }

    /// Metrics reported in-stream, normalized to the native vocabulary.
    pub fn metrics(&self) -> Option<Vec<Metric>> {
        match self {
            ProviderChunk::Llama { event, .. } => event.metrics.clone(),
            ProviderChunk::OpenAi { usage, .. } => usage.as_ref().map(OpenAiUsage::to_metrics),
            _ => None,
        }
    }

    /// Message of an in-stream error report.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ProviderChunk::Error { error } if !error.is_null() => Some(error_text(error)),
            _ => None,
        }
    }
}

fn non_null<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Err(de::Error::custom("null error field")),
        value => Ok(value),
    }
}

/// Non-streaming provider answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CompletionPayload {
    Llama {
        #[serde(default)]
        id: Option<String>,
        completion_message: LlamaCompletionMessage,
        #[serde(default)]
        metrics: Option<Vec<Metric>>,
    },
    OpenAi {
        #[serde(default)]
        id: Option<String>,
        choices: Vec<OpenAiChoice>,
        #[serde(default)]
        usage: Option<OpenAiUsage>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlamaCompletionMessage {
    #[serde(default)]
    pub content: Option<LlamaContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LlamaContent {
    Text(String),
    Item {
        #[serde(default)]
        text: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionPayload {
    /// Flatten into `(content, id, metrics)`; missing content becomes empty text.
    pub fn into_parts(self) -> (String, Option<String>, Option<Vec<Metric>>) {
        match self {
            CompletionPayload::Llama {
                id,
                completion_message,
                metrics,
            } => {
                let content = match completion_message.content {
                    Some(LlamaContent::Text(text)) => text,
                    Some(LlamaContent::Item { text }) => text.unwrap_or_default(),
                    None => String::new(),
                };
                (content, id, metrics)
            }
            CompletionPayload::OpenAi { id, choices, usage } => {
                let content = choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                (content, id, usage.as_ref().map(OpenAiUsage::to_metrics))
            }
        }
    }
}

/// Best-effort human-readable text of a provider error value.
pub fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
