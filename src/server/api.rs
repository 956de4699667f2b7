//! Chat relay HTTP API.
//!
//! - POST /api/chat/completions
//! - GET /api/models
//! - GET /api/health
//! - POST /api/upload
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderName, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, ServerConfig};
use crate::metrics::{RelayMetrics, StreamOutcome};
use crate::relay::adapter::UpstreamAdapter;
use crate::relay::writer::relay;
use crate::server::error::ApiError;
use crate::server::upload::upload_image;
use crate::server::validation::{validate_chat_request, ValidationError};

/// Application state shared across handlers.
pub struct AppState {
    pub adapter: UpstreamAdapter,
    pub config: Arc<Config>,
    pub metrics: RelayMetrics,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.upload.max_bytes;

    let mut app = Router::new()
        // Multimodal messages carry base64 images, so allow room for one upload.
        .route(
            "/api/chat/completions",
            post(chat_completions).layer(DefaultBodyLimit::max(upload_limit * 2)),
        )
        .route("/api/models", get(list_models))
        .route("/api/health", get(health))
        .route(
            "/api/upload",
            post(upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/metrics", get(metrics))
        .with_state(state.clone());

    let static_dir = &state.config.server.static_dir;
    if static_dir.is_dir() {
        let index = static_dir.join("index.html");
        app = app.fallback_service(ServeDir::new(static_dir).not_found_service(ServeFile::new(index)));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&state.config.server)),
    )
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
        ]);

    if config.cors_allow_any_origin {
        layer.allow_origin(Any)
    } else {
        layer
    }
}

// ─── Response Types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub input: &'static str,
    pub output: &'static str,
    pub provider: &'static str,
}

/// Models offered by the Llama API.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "Llama-4-Scout-17B-16E-Instruct-FP8",
        name: "Llama 4 Scout 17B 16E Instruct (FP8)",
        input: "Text, image",
        output: "Text",
        provider: "Meta",
    },
    ModelInfo {
        id: "Cerebras-Llama-4-Scout-17B-16E-Instruct",
        name: "Cerebras Llama 4 Scout 17B 16E Instruct",
        input: "Text",
        output: "Text",
        provider: "Cerebras",
    },
    ModelInfo {
        id: "Llama-4-Maverick-17B-128E-Instruct-FP8",
        name: "Llama 4 Maverick 17B 128E Instruct (FP8)",
        input: "Text, image",
        output: "Text",
        provider: "Meta",
    },
    ModelInfo {
        id: "Groq-Llama-4-Maverick-17B-128E-Instruct",
        name: "Groq Llama 4 Maverick 17B 128E Instruct",
        input: "Text",
        output: "Text",
        provider: "Groq",
    },
    ModelInfo {
        id: "Llama-3.3-70B-Instruct",
        name: "Llama 3.3 70B Instruct",
        input: "Text",
        output: "Text",
        provider: "Meta",
    },
    ModelInfo {
        id: "Llama-3.3-8B-Instruct",
        name: "Llama 3.3 8B Instruct",
        input: "Text",
        output: "Text",
        provider: "Meta",
    },
];

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    /// RFC 3339 UTC time of the check, millisecond precision.
    pub timestamp: String,
    pub uptime_secs: u64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4().to_string();

    let Json(body) = payload.map_err(|e| ValidationError::Body(e.body_text()))?;
    let request = validate_chat_request(&body, &state.config.provider.default_model)?;

    info!(
        request_id = request_id,
        model = request.model,
        messages = request.messages.len(),
        stream = request.stream,
        provider = state.adapter.provider_name(),
        "Chat completion request"
    );
    state.metrics.record_request(request.stream);

    if request.stream {
        let events = state
            .adapter
            .open_stream(&request)
            .await
            .inspect_err(|_| state.metrics.record_stream(StreamOutcome::Rejected))?;
        Ok(relay(events, request_id, state.metrics.clone()).await?)
    } else {
        let response = state.adapter.complete(&request).await?;
        info!(
            request_id = request_id,
            chars = response.completion_message.content.len(),
            "Chat completion answered"
        );
        Ok(Json(response).into_response())
    }
}

async fn list_models() -> Json<ModelList> {
    Json(ModelList {
        models: MODELS.to_vec(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let text = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response())
}
