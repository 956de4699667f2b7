//! llama-relay: chat relay for a remote text-generation provider.
//!
//! Mediates a chat exchange with the Llama API and hands the answer to the
//! caller either as one JSON document or as an incremental event stream:
//!   provider chunks → logical events → `data:` frames → client callbacks
//!
//! - [`relay`]: frame codec, upstream stream adapter, relay writer
//! - [`client`]: chunk-boundary-safe frame reader and HTTP client
//! - [`provider`]: upstream provider trait and the Llama API implementation
//! - [`server`]: HTTP routes, request validation, uploads, metrics

pub mod chat;
pub mod client;
pub mod config;
pub mod metrics;
pub mod provider;
pub mod relay;
pub mod server;
