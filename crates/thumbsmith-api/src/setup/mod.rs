//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use thumbsmith_core::Config;
use thumbsmith_infra::LogFormat;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    // Validate configuration first - fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    let log_format = config
        .log_format
        .parse::<LogFormat>()
        .map_err(|e| anyhow::anyhow!(e))?;
    thumbsmith_infra::init_telemetry("thumbsmith-api", &config.environment, log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!("Configuration loaded and validated successfully");

    let pool = database::setup_database(&config).await?;

    let state = services::initialize_services(&config, pool).await?;

    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
