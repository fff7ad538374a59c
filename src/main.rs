use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

use respond_serve::{create_router, AppState, ServerConfig};

const DEFAULT_LOG_FILTER: &str = "respond_serve=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    fmt().with_env_filter(filter).init();

    tracing::info!("respond-serve v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(model_id = %config.model_id, revision = %config.revision, "loading model");

    let load_config = config.clone();
    let state = tokio::task::spawn_blocking(move || AppState::load(&load_config))
        .await
        .context("model loading task failed")?
        .with_context(|| format!("failed to load {}", config.model_id))?;

    let app = create_router(Arc::new(state));

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, workers = config.workers, queue_depth = config.queue_depth, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
