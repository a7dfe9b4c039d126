//! Database setup and initialization

use anyhow::{Context, Result};
use scoremate_core::config::DatabaseBackend;
use scoremate_core::Config;
use scoremate_db::{InMemoryRepository, Repositories};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;

/// Connect and run migrations, or build process-local repositories when
/// `DATABASE_BACKEND=memory`.
pub async fn setup_database(config: &Config) -> Result<(Option<PgPool>, Repositories)> {
    match config.database_backend() {
        DatabaseBackend::Postgres => {
            let pool = connect(config).await?;
            let repos = Repositories::postgres(pool.clone());
            Ok((Some(pool), repos))
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory repositories; state is lost on restart");
            Ok((None, Repositories::in_memory(InMemoryRepository::new())))
        }
    }
}

async fn connect(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(config.database_url())
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    // Workspace migrations/ relative to this crate
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}
