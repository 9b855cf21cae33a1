//! Storage setup and initialization

use anyhow::{Context, Result};
use skycloud_core::Config;
use skycloud_storage::{create_storage, Storage};
use std::sync::Arc;

/// Build the configured backend. Fails when the backend does not pass its self-test.
pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!(backend = %config.storage_backend(), "Initializing storage backend...");

    let storage = create_storage(config)
        .await
        .context("Storage backend is not usable")?;

    tracing::info!(
        backend = %storage.backend_type(),
        "Storage backend initialized and verified"
    );

    Ok(storage)
}
