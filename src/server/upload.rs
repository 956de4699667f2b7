//! Image upload: raw image body in, base64 data URL out.
//!
//! The returned URL can be placed directly in an `image_url` content item.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::server::api::AppState;
use crate::server::error::ApiError;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Image exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("Only image uploads are allowed, got {0:?}")]
    UnsupportedType(String),

    #[error("No image data received")]
    Empty,

    #[error("Failed to read upload: {0}")]
    Body(String),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::Empty | UploadError::Body(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
    pub media_type: String,
    pub size: usize,
}

/// Normalized media type of an image upload, or why it is refused.
pub fn image_media_type(headers: &HeaderMap) -> Result<String, UploadError> {
    let raw = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media_type = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    if media_type.starts_with("image/") && media_type.len() > "image/".len() {
        Ok(media_type)
    } else {
        Err(UploadError::UnsupportedType(raw.to_string()))
    }
}

pub fn to_data_url(media_type: &str, data: &[u8]) -> String {
    format!("data:{media_type};base64,{}", STANDARD.encode(data))
}

pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<UploadedImage>, ApiError> {
    let limit = state.config.upload.max_bytes;
    let media_type = image_media_type(&headers)?;

    let data = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge { limit }
        } else {
            UploadError::Body(rejection.body_text())
        }
    })?;

    if data.is_empty() {
        return Err(UploadError::Empty.into());
    }
    if data.len() > limit {
        return Err(UploadError::TooLarge { limit }.into());
    }

    info!(media_type, size = data.len(), "Image uploaded");

    Ok(Json(UploadedImage {
        url: to_data_url(&media_type, &data),
        media_type,
        size: data.len(),
    }))
}
