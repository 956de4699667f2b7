//! Inbound chat request validation.
//!
//! Works on the raw JSON value so every malformed shape maps to a precise
//! 400 message instead of a generic deserialization rejection. Runs before
//! the provider is contacted.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::chat::{ChatMessage, ChatRequest, ContentPart, ImageUrl, MessageContent, Role};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid request body: {0}")]
    Body(String),

    #[error("Messages array is required and cannot be empty")]
    MissingMessages,

    #[error("Each message must have content and role properties")]
    IncompleteMessage { index: usize },

    #[error("Message {index} has unsupported role {role:?}")]
    UnknownRole { index: usize, role: String },

    #[error("Message {index}: text content items must have a text property")]
    MissingText { index: usize },

    #[error("Message {index}: image content items must have an image_url.url property")]
    MissingImageUrl { index: usize },

    #[error("Message {index}: content items must have type \"text\" or \"image_url\"")]
    UnknownContentType { index: usize },

    #[error("Model must be a string")]
    InvalidModel,

    #[error("Stream must be a boolean")]
    InvalidStream,
}

/// Validate a chat request body and build the typed request.
pub fn validate_chat_request(body: &Value, default_model: &str) -> Result<ChatRequest, ValidationError> {
    let object = body
        .as_object()
        .ok_or_else(|| ValidationError::Body("expected a JSON object".to_string()))?;

    let messages = match object.get("messages") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(ValidationError::MissingMessages),
    };

    let messages = messages
        .iter()
        .enumerate()
        .map(|(index, message)| validate_message(index, message))
        .collect::<Result<Vec<_>, _>>()?;

    let model = match object.get("model") {
        None | Some(Value::Null) => default_model.to_string(),
        Some(Value::String(model)) if !model.is_empty() => model.clone(),
        Some(_) => return Err(ValidationError::InvalidModel),
    };

    let stream = match object.get("stream") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(stream)) => *stream,
        Some(_) => return Err(ValidationError::InvalidStream),
    };

    Ok(ChatRequest {
        messages,
        model,
        stream,
    })
}

fn validate_message(index: usize, message: &Value) -> Result<ChatMessage, ValidationError> {
    let incomplete = ValidationError::IncompleteMessage { index };
    let message = message.as_object().ok_or_else(|| incomplete.clone())?;

    let role = match message.get("role") {
        Some(Value::String(role)) if !role.is_empty() => role,
        _ => return Err(incomplete),
    };
    let role = Role::from_name(role).ok_or_else(|| ValidationError::UnknownRole {
        index,
        role: role.clone(),
    })?;

    let content = match message.get("content") {
        Some(Value::String(text)) if !text.is_empty() => MessageContent::Text(text.clone()),
        Some(Value::Array(items)) if !items.is_empty() => MessageContent::Parts(
            items
                .iter()
                .map(|item| validate_part(index, item))
                .collect::<Result<_, _>>()?,
        ),
        _ => return Err(incomplete),
    };

    Ok(ChatMessage { role, content })
}

fn validate_part(index: usize, item: &Value) -> Result<ContentPart, ValidationError> {
    let item: &Map<String, Value> = item
        .as_object()
        .ok_or(ValidationError::UnknownContentType { index })?;

    match item.get("type").and_then(Value::as_str) {
        Some("text") => match item.get("text") {
            Some(Value::String(text)) => Ok(ContentPart::Text { text: text.clone() }),
            _ => Err(ValidationError::MissingText { index }),
        },
        Some("image_url") => item
            .get("image_url")
            .and_then(|image| image.get("url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.to_string(),
                },
            })
            .ok_or(ValidationError::MissingImageUrl { index }),
        _ => Err(ValidationError::UnknownContentType { index }),
    }
}
