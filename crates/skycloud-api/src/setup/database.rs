//! Database setup and initialization

use anyhow::{Context, Result};
use skycloud_core::Config;
use skycloud_db::{FileRepository, InMemoryFileRepository, PgFileRepository};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// PostgreSQL when `DATABASE_URL` is set, otherwise a process-local repository.
pub async fn setup_repository(config: &Config) -> Result<Arc<dyn FileRepository>> {
    match config.database_url() {
        Some(url) => {
            let pool = setup_database(config, url).await?;
            Ok(Arc::new(PgFileRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, file records are kept in memory only");
            Ok(Arc::new(InMemoryFileRepository::new()))
        }
    }
}

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config, url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
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
