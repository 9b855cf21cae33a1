#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use bytes::Bytes;
use skycloud_core::Config;
use std::sync::Arc;
use uuid::Uuid;

/// Create the configured storage backend and verify it is usable.
///
/// The backend is chosen once; a failed self-test is reported as
/// [`StorageError::BackendUnavailable`] and callers are expected to abort startup.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let storage_config = config.storage();

    let storage: Arc<dyn Storage> = match config.storage_backend() {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => Arc::new(S3Storage::new(storage_config).await?),

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => {
            return Err(StorageError::ConfigError(
                "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
            ))
        }

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => Arc::new(
            LocalStorage::new(
                storage_config.local_storage_path.clone(),
                storage_config.subdirectory.as_deref(),
            )
            .await?,
        ),

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => {
            return Err(StorageError::ConfigError(
                "Local storage backend not available (storage-local feature not enabled)"
                    .to_string(),
            ))
        }
    };

    verify_access(storage.as_ref()).await?;

    tracing::info!(
        backend = %storage.backend_type(),
        subdirectory = ?storage_config.subdirectory,
        "Storage backend ready"
    );

    Ok(storage)
}

/// Write, read back and delete a random probe object.
pub async fn verify_access(storage: &dyn Storage) -> StorageResult<()> {
    let id = Uuid::new_v4();
    let key = format!(".skycloud-probe-{}", id);
    let payload = Bytes::from(id.as_bytes().to_vec());

    let unavailable = |stage: &str, detail: String| {
        tracing::error!(
            backend = %storage.backend_type(),
            key = %key,
            stage = stage,
            detail = %detail,
            "Storage self-test failed"
        );
        StorageError::BackendUnavailable(format!("{} probe failed: {}", stage, detail))
    };

    storage
        .put(&key, payload.clone(), Some("application/octet-stream"))
        .await
        .map_err(|e| unavailable("write", e.to_string()))?;

    let read_back = storage
        .read_all(&key)
        .await
        .map_err(|e| unavailable("read", e.to_string()))?;

    match read_back {
        Some(data) if data == payload => {}
        Some(_) => return Err(unavailable("read", "content mismatch".to_string())),
        None => return Err(unavailable("read", "probe object missing".to_string())),
    }

    storage
        .delete(&key)
        .await
        .map_err(|e| unavailable("delete", e.to_string()))?;

    Ok(())
}
