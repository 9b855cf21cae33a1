//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod storage;
pub mod worker;

use crate::state::AppState;
use anyhow::{Context, Result};
use skycloud_core::Config;
use skycloud_processing::ChunkReassembler;
use skycloud_worker::SchedulerHandle;
use std::sync::Arc;
use std::time::Duration;

/// A fully wired application.
pub struct App {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub scheduler: SchedulerHandle,
}

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<App> {
    // Validate configuration first - fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.environment())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!("Configuration loaded and validated successfully");

    let repository = database::setup_repository(&config).await?;
    let storage = storage::setup_storage(&config).await?;

    let reassembler = Arc::new(ChunkReassembler::new(
        Arc::clone(&storage),
        config.chunks().temp_directory.clone(),
        Duration::from_secs(config.chunks().session_timeout_secs),
        config.max_file_size_bytes(),
    ));

    let scheduler = worker::start_lifecycle(
        &config,
        Arc::clone(&storage),
        Arc::clone(&repository),
        Arc::clone(&reassembler),
    );

    let state = Arc::new(AppState::new(config.clone(), storage, repository, reassembler));
    let router = routes::setup_routes(&config, Arc::clone(&state));

    Ok(App {
        state,
        router,
        scheduler,
    })
}
