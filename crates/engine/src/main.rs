//! Anomaly engine - streaming anomaly detection and alert delivery service

use anomaly_engine::{api, config};
use engine_lib::{health::HealthRegistry, observability::EngineMetrics};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting anomaly-engine");

    let config = config::EngineConfig::load()?;
    info!(
        node_name = %config.node_name,
        channels = config.channels.len(),
        sla_secs = config.sla_secs,
        "Engine configured"
    );

    let health_registry = HealthRegistry::new();
    api::register_components(&health_registry).await;

    // Register metrics before the first scrape
    let _metrics = EngineMetrics::new();

    let app_state = Arc::new(api::AppState::from_config(&config, health_registry.clone()));
    app_state.logger.log_startup(ENGINE_VERSION, config.channels.len());

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, Arc::clone(&app_state)));

    tokio::select! {
        result = api_handle => {
            match result {
                Ok(Err(err)) => error!(error = %err, "API server failed"),
                Err(err) => error!(error = %err, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            app_state.logger.log_shutdown("API server stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            app_state.logger.log_shutdown("SIGINT received");
        }
    }

    info!("Shutting down");
    Ok(())
}
