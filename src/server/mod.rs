//! HTTP server for the chat relay.
//!
//! - [`api`]: Router, shared state and route handlers
//! - [`validation`]: Chat request shape checks
//! - [`upload`]: Image upload to data URL
//! - [`error`]: JSON error responses

pub mod api;
pub mod error;
pub mod upload;
pub mod validation;

pub use api::{build_router, AppState};
pub use error::ApiError;
