//! Runtime configuration for llama-relay.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Provider credentials live here and are handed to the provider constructor;
//! nothing reads them from process state after startup.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::chat::DEFAULT_MODEL;

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "LLAMA_API_KEY";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llama-relay", about = "Chat relay server for the Llama API")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream provider configuration.
    pub provider: ProviderConfig,

    /// Image upload limits.
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory served as static files (the chat frontend).
    pub static_dir: PathBuf,

    /// Allow cross-origin requests from any origin.
    pub cors_allow_any_origin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("public"),
            cors_allow_any_origin: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API, without a trailing slash.
    pub base_url: String,

    /// Bearer token for the provider. Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model used when a request omits `model`.
    pub default_model: String,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for the non-streaming call. Streams have none.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.llama.com/v1".to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted image payload in bytes.
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Overlay settings taken from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.provider.api_key = Some(key);
            }
        }
    }
}
