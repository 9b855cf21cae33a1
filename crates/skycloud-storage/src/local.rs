use crate::keys;
use crate::traits::{empty_stream, ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    subdirectory: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "./uploads")
    /// * `subdirectory` - Optional prefix applied to every key below `base_path`
    pub async fn new(
        base_path: impl Into<PathBuf>,
        subdirectory: Option<&str>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();
        let subdirectory = keys::normalize_subdirectory(subdirectory);

        let scope = match &subdirectory {
            Some(sub) => base_path.join(sub),
            None => base_path.clone(),
        };

        fs::create_dir_all(&scope).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                scope.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            subdirectory,
        })
    }

    /// Directory holding every object this instance can see.
    fn scope_dir(&self) -> PathBuf {
        match &self.subdirectory {
            Some(sub) => self.base_path.join(sub),
            None => self.base_path.clone(),
        }
    }

    /// Convert a bare key to its filesystem path, rejecting traversal.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        let qualified = keys::qualify(self.subdirectory.as_deref(), key)?;
        Ok(self.base_path.join(qualified))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Every regular file under `root` with its size.
    async fn walk_files(root: &Path) -> StorageResult<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let len = entry.metadata().await?.len();
                    files.push((entry.path(), len));
                }
            }
        }

        Ok(files)
    }

    fn into_byte_stream<R>(reader: R, key: &str) -> ByteStream
    where
        R: tokio::io::AsyncRead + Send + 'static,
    {
        let key = key.to_string();
        let stream = ReaderStream::new(reader).map(move |result| {
            result.map_err(|e| {
                tracing::error!(key = %key, error = %e, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });
        Box::pin(stream)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<ByteStream>> {
        let path = self.key_to_path(key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Some(Self::into_byte_stream(file, key)))
    }

    async fn put(&self, key: &str, data: Bytes, _mimetype: Option<&str>) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn size(&self, key: &str) -> u64 {
        let Ok(path) = self.key_to_path(key) else {
            return 0;
        };
        fs::metadata(&path).await.map(|meta| meta.len()).unwrap_or(0)
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        if end < start {
            return Err(StorageError::BackendError(format!(
                "Invalid byte range {}-{}",
                start, end
            )));
        }

        let path = self.key_to_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(empty_stream()),
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        file.seek(SeekFrom::Start(start)).await?;
        let limited = file.take(end - start + 1);

        Ok(Self::into_byte_stream(limited, key))
    }

    async fn total_size(&self) -> StorageResult<u64> {
        let files = Self::walk_files(&self.scope_dir()).await?;
        Ok(files.iter().map(|(_, len)| len).sum())
    }

    async fn clear(&self) -> StorageResult<()> {
        let scope = self.scope_dir();
        let start = std::time::Instant::now();

        let mut entries = match fs::read_dir(&scope).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }

        tracing::info!(
            path = %scope.display(),
            entries = removed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage cleared"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_local_storage_put_get() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage
            .put("test.txt", Bytes::from_static(b"test data"), Some("text/plain"))
            .await
            .unwrap();

        let stream = storage.get("test.txt").await.unwrap().unwrap();
        assert_eq!(collect(stream).await, b"test data");
        assert_eq!(storage.size("test.txt").await, 9);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(storage.get("missing.bin").await.unwrap().is_none());
        assert!(storage.read_all("missing.bin").await.unwrap().is_none());
        assert_eq!(storage.size("missing.bin").await, 0);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        let result = storage.get("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage
            .put("/etc/passwd", Bytes::from_static(b"x"), None)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage
            .put("a.txt", Bytes::from_static(b"first version"), None)
            .await
            .unwrap();
        storage
            .put("a.txt", Bytes::from_static(b"second"), None)
            .await
            .unwrap();

        let data = storage.read_all("a.txt").await.unwrap().unwrap();
        assert_eq!(&data[..], b"second");
    }

    #[tokio::test]
    async fn test_range_is_inclusive() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage
            .put("digits.txt", Bytes::from_static(b"0123456789"), None)
            .await
            .unwrap();

        let stream = storage.range("digits.txt", 2, 5).await.unwrap();
        assert_eq!(collect(stream).await, b"2345");

        let stream = storage.range("digits.txt", 8, 100).await.unwrap();
        assert_eq!(collect(stream).await, b"89");

        let stream = storage.range("missing.txt", 0, 10).await.unwrap();
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_subdirectory_prefix_applied() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Some("/tenant-a/"))
            .await
            .unwrap();

        storage
            .put("file.bin", Bytes::from_static(b"abc"), None)
            .await
            .unwrap();

        assert!(dir.path().join("tenant-a").join("file.bin").exists());
        assert!(!dir.path().join("file.bin").exists());
    }

    #[tokio::test]
    async fn test_total_size_and_clear_are_scoped() {
        let dir = tempdir().unwrap();
        let scoped = LocalStorage::new(dir.path(), Some("scope")).await.unwrap();
        let root = LocalStorage::new(dir.path(), None).await.unwrap();

        root.put("outside.bin", Bytes::from_static(b"12345"), None)
            .await
            .unwrap();
        scoped
            .put("one.bin", Bytes::from_static(b"abc"), None)
            .await
            .unwrap();
        scoped
            .put("nested/two.bin", Bytes::from_static(b"defg"), None)
            .await
            .unwrap();

        assert_eq!(scoped.total_size().await.unwrap(), 7);
        assert_eq!(root.total_size().await.unwrap(), 12);

        scoped.clear().await.unwrap();
        assert_eq!(scoped.total_size().await.unwrap(), 0);
        assert_eq!(root.size("outside.bin").await, 5);
    }

    #[tokio::test]
    async fn test_total_size_follows_puts_and_deletes() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage
            .put("a.bin", Bytes::from(vec![1u8; 100]), None)
            .await
            .unwrap();
        storage
            .put("b.bin", Bytes::from(vec![2u8; 50]), None)
            .await
            .unwrap();
        assert_eq!(storage.total_size().await.unwrap(), 150);

        storage.delete("a.bin").await.unwrap();
        assert_eq!(storage.total_size().await.unwrap(), 50);
        assert_eq!(storage.size("a.bin").await, 0);
    }
}
