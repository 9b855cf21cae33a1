//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// The startup self-test could not write, read back or delete a probe object.
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for skycloud_core::AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => skycloud_core::AppError::NotFound(key),
            StorageError::BackendUnavailable(msg) => {
                skycloud_core::AppError::BackendUnavailable(msg)
            }
            other => skycloud_core::AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked object content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// An empty [`ByteStream`], returned for ranges over missing objects.
pub fn empty_stream() -> ByteStream {
    Box::pin(futures::stream::empty())
}

/// Storage abstraction trait
///
/// Backends are selected once at startup and shared as `Arc<dyn Storage>` by the
/// upload path and every lifecycle task. All keys are bare; the backend applies its
/// configured subdirectory.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream an object, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<ByteStream>>;

    /// Store `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: Bytes, mimetype: Option<&str>) -> StorageResult<()>;

    /// Remove an object. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Object size in bytes; 0 when the key is missing or the lookup fails.
    async fn size(&self, key: &str) -> u64;

    /// Stream the inclusive byte range `start..=end`.
    ///
    /// Missing keys yield an empty stream. Ranges past the end of the object are
    /// truncated to the object length.
    async fn range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream>;

    /// Total bytes stored under the configured scope.
    async fn total_size(&self) -> StorageResult<u64>;

    /// Remove every object under the configured scope.
    async fn clear(&self) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Buffer a whole object in memory.
    async fn read_all(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let Some(mut stream) = self.get(key).await? else {
            return Ok(None);
        };

        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Some(buffer.freeze()))
    }
}
