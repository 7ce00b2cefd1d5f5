use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rollcall_store::{GalleryStore, Store};

mod config;
mod engine;
mod http;
mod service;

use config::Config;
use service::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database open");

    let gallery = GalleryStore::new(&config.data_dir)
        .with_context(|| format!("preparing photo storage in {}", config.data_dir.display()))?;

    // Fail-fast: a missing or broken model stops the daemon here, not on the
    // first attendance request.
    let vision = engine::spawn_vision(&config.model_dir, config.distance_metric)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let settings = config.service_settings();
    let service = Arc::new(AttendanceService::new(
        Arc::new(vision),
        store,
        gallery,
        settings,
    ));

    let app = http::router(service);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
    }
}
