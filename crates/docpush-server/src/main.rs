//! docpush compile server
//!
//! HTTP front end that turns algebra plans into document-store queries.

use anyhow::Context;
use tracing::info;

mod api;
mod catalog;
mod config;
mod logging;
mod metrics;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("DOCPUSH_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    config.apply_logging_env();
    logging::init();

    let catalog = catalog::load_catalog(config.catalog.path.as_deref()).context("loading catalog")?;
    let metrics = metrics::Metrics::new().context("registering metrics")?;
    let state = api::AppState::new(catalog, config.cache.capacity, metrics);

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("Starting docpush server on {}", addr);
    info!(cache_capacity = config.cache.capacity, "Endpoints: POST /compile, GET /entities, GET /health, GET /metrics");

    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
