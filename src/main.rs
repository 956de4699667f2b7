//! llama-relay server binary.
//!
//! Relays chat requests to the Llama API and streams answers back to
//! browsers and CLI clients as `data:` frames.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use llama_relay::config::{Cli, Config};
use llama_relay::metrics::RelayMetrics;
use llama_relay::provider::llama_api::LlamaApiProvider;
use llama_relay::relay::UpstreamAdapter;
use llama_relay::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llama_relay=debug,tower_http=debug"
    } else {
        "llama_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("llama-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; credentials come from the environment.
    let mut config = Config::load(&cli.config)?;
    config.apply_env();
    let config = Arc::new(config);

    info!(
        base_url = config.provider.base_url,
        default_model = config.provider.default_model,
        api_key = config.provider.api_key.is_some(),
        static_dir = %config.server.static_dir.display(),
        upload_limit = config.upload.max_bytes,
        "Configuration loaded"
    );

    // Upstream provider.
    let provider = LlamaApiProvider::new(&config.provider)?;

    // Build application state.
    let state = Arc::new(AppState {
        adapter: UpstreamAdapter::new(Arc::new(provider)),
        config: config.clone(),
        metrics: RelayMetrics::new()?,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen;
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");
    info!("  POST /api/chat/completions - Chat with Llama");
    info!("  GET  /api/models           - Available models");
    info!("  GET  /api/health           - Health check");
    info!("  POST /api/upload           - Image to data URL");

    axum::serve(listener, app).await?;

    Ok(())
}
