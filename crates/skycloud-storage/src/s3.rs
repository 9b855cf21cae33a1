use crate::keys;
use crate::traits::{empty_stream, ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, GetOptions, GetRange, ObjectStore, ObjectStoreExt, PutPayload,
    Result as ObjectResult,
};
use skycloud_core::StorageConfig;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    subdirectory: Option<String>,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// `s3_endpoint` targets S3-compatible providers (e.g., "http://localhost:9000" for
    /// MinIO). Credentials fall back to the usual `AWS_*` environment variables.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket.clone());

        if let Some(ref region) = config.s3_region {
            builder = builder.with_region(region.clone());
        }

        if let Some(ref endpoint) = config.s3_endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        if let (Some(key_id), Some(secret)) =
            (&config.s3_access_key_id, &config.s3_secret_access_key)
        {
            builder = builder
                .with_access_key_id(key_id.clone())
                .with_secret_access_key(secret.clone());
        }

        // Custom endpoints are addressed path-style unless the bucket is in the host.
        let virtual_hosted = !config.s3_force_path_style && config.s3_endpoint.is_none();
        builder = builder.with_virtual_hosted_style_request(virtual_hosted);

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            subdirectory: keys::normalize_subdirectory(config.subdirectory.as_deref()),
        })
    }

    fn location(&self, key: &str) -> StorageResult<Path> {
        let qualified = keys::qualify(self.subdirectory.as_deref(), key)?;
        Ok(Path::from(qualified))
    }

    fn scope(&self) -> Option<Path> {
        self.subdirectory.as_ref().map(|sub| Path::from(sub.as_str()))
    }

    fn into_byte_stream(
        stream: futures::stream::BoxStream<'static, ObjectResult<Bytes>>,
        bucket: String,
        key: String,
    ) -> ByteStream {
        Box::pin(stream.map(move |res| {
            res.map_err(|e| {
                tracing::error!(
                    bucket = %bucket,
                    key = %key,
                    error = %e,
                    "S3 stream download error"
                );
                StorageError::DownloadFailed(e.to_string())
            })
        }))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn get(&self, key: &str) -> StorageResult<Option<ByteStream>> {
        let start = std::time::Instant::now();
        let location = self.location(key)?;

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(ObjectStoreError::NotFound { .. }) => return Ok(None),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                return Err(StorageError::DownloadFailed(e.to_string()));
            }
        };

        Ok(Some(Self::into_byte_stream(
            result.into_stream(),
            self.bucket.clone(),
            key.to_string(),
        )))
    }

    async fn put(&self, key: &str, data: Bytes, mimetype: Option<&str>) -> StorageResult<()> {
        let location = self.location(key)?;
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        let mut attributes = Attributes::new();
        if let Some(mimetype) = mimetype {
            attributes.insert(Attribute::ContentType, mimetype.to_string().into());
        }

        let result: ObjectResult<_> = self
            .store
            .put_opts(&location, PutPayload::from(data), attributes.into())
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 put failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = self.location(key)?;

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn size(&self, key: &str) -> u64 {
        let Ok(location) = self.location(key) else {
            return 0;
        };
        match self.store.head(&location).await {
            Ok(meta) => meta.size,
            Err(ObjectStoreError::NotFound { .. }) => 0,
            Err(e) => {
                tracing::warn!(bucket = %self.bucket, key = %key, error = %e, "S3 head failed");
                0
            }
        }
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        if end < start {
            return Err(StorageError::BackendError(format!(
                "Invalid byte range {}-{}",
                start, end
            )));
        }

        let location = self.location(key)?;
        let meta = match self.store.head(&location).await {
            Ok(meta) => meta,
            Err(ObjectStoreError::NotFound { .. }) => return Ok(empty_stream()),
            Err(e) => return Err(StorageError::DownloadFailed(e.to_string())),
        };

        if start >= meta.size {
            return Ok(empty_stream());
        }
        let end = end.min(meta.size - 1);

        let options = GetOptions {
            range: Some(GetRange::Bounded(start..end + 1)),
            ..Default::default()
        };

        let result = match self.store.get_opts(&location, options).await {
            Ok(result) => result,
            Err(ObjectStoreError::NotFound { .. }) => return Ok(empty_stream()),
            Err(e) => return Err(StorageError::DownloadFailed(e.to_string())),
        };

        Ok(Self::into_byte_stream(
            result.into_stream(),
            self.bucket.clone(),
            key.to_string(),
        ))
    }

    async fn total_size(&self) -> StorageResult<u64> {
        let prefix = self.scope();
        self.store
            .list(prefix.as_ref())
            .map_err(|e| StorageError::BackendError(e.to_string()))
            .try_fold(0u64, |acc, meta| async move { Ok(acc + meta.size) })
            .await
    }

    async fn clear(&self) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let prefix = self.scope();

        let locations: Vec<Path> = self
            .store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        for location in &locations {
            match self.store.delete(location).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
                Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            objects = locations.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 storage cleared"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
