//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use crate::state::AppState;
use anyhow::{Context, Result};
use scoremate_core::Config;
use std::sync::Arc;

/// Validate configuration, connect backends, start the worker pool and build
/// the router. Tracing must already be initialized.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config
        .validate()
        .context("Configuration validation failed")?;
    tracing::info!(
        production = config.is_production(),
        "Configuration loaded and validated successfully"
    );

    let (pool, repos) = database::setup_database(&config).await?;
    let storage = storage::setup_storage(&config).await?;
    let state = services::initialize_services(&config, pool, repos, storage).await?;
    let router = routes::setup_routes(&config, state.clone()).await?;

    Ok((state, router))
}
