//! Error responses for the HTTP API.
//!
//! Every failure that happens before a stream is committed becomes a JSON
//! `{error, message?, type?}` body with a status that tells validation
//! problems (400) apart from upstream and internal ones.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use crate::chat::ErrorBody;
use crate::provider::ProviderError;
use crate::relay::RelayError;
use crate::server::upload::UploadError;
use crate::server::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, ErrorBody::new(e.to_string())),
            ApiError::Provider(ProviderError::Api {
                status,
                message,
                kind,
            }) => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                ErrorBody {
                    error: message.clone(),
                    message: None,
                    kind: kind.clone(),
                },
            ),
            ApiError::Provider(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Internal server error".to_string(),
                    message: Some(e.to_string()),
                    kind: None,
                },
            ),
            ApiError::Relay(e) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    error: "Upstream stream failed".to_string(),
                    message: Some(e.to_string()),
                    kind: None,
                },
            ),
            ApiError::Upload(e) => (e.status(), ErrorBody::new(e.to_string())),
            ApiError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Internal server error".to_string(),
                    message: Some(m.clone()),
                    kind: None,
                },
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {self}");
        } else {
            warn!(status = status.as_u16(), "Request rejected: {self}");
        }
        (status, Json(body)).into_response()
    }
}
