use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fetchproxy::config::{ServiceConfig, SWEEP_INTERVAL};
use fetchproxy::engine::ytdlp::YtDlpEngine;
use fetchproxy::server::handler::{router, AppState};
use fetchproxy::workspace::{ScratchWorkspace, Sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env();
    info!("scratch dir {}", config.scratch_dir);

    let workspace = Arc::new(ScratchWorkspace::new(&config.scratch_dir)?);
    let engine = Arc::new(YtDlpEngine::new(
        config.engine_bin.as_str(),
        config.download_timeout(),
    ));

    match engine.check_available().await {
        Ok(version) => info!("engine {} version {}", config.engine_bin, version),
        Err(e) => warn!("engine check failed ({}); requests will surface 503", e),
    }

    let sweeper = Sweeper::new(Arc::clone(&workspace), SWEEP_INTERVAL);
    sweeper.start();

    let state = AppState { engine, workspace };
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
