use chrono::{DateTime, Utc};
use skycloud_core::models::{FileRecord, MetricSnapshot, NewFileRecord, UsageStats};
use skycloud_core::AppError;
use uuid::Uuid;

/// Trait for file record persistence
///
/// Shared as `Arc<dyn FileRepository>` by the HTTP layer and the scheduled tasks.
#[async_trait::async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a new record. Fails with `Conflict` when the name is taken.
    async fn create_file_record(&self, file: NewFileRecord) -> Result<FileRecord, AppError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<FileRecord>, AppError>;

    /// Records whose `deletes_at` is at or before `now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError>;

    /// Records whose view count reached their limit.
    async fn find_max_viewed(&self) -> Result<Vec<FileRecord>, AppError>;

    /// Bump the view counter and return the new value.
    async fn increment_view_count(&self, id: Uuid) -> Result<i64, AppError>;

    /// Remove a record. Missing records are not an error.
    async fn delete_file_record(&self, id: Uuid) -> Result<(), AppError>;

    /// Images and videos without a thumbnail, oldest first. Files that failed
    /// [`MAX_THUMBNAIL_ATTEMPTS`] times are left out.
    ///
    /// [`MAX_THUMBNAIL_ATTEMPTS`]: skycloud_core::models::MAX_THUMBNAIL_ATTEMPTS
    async fn find_missing_thumbnails(&self, limit: i64) -> Result<Vec<FileRecord>, AppError>;

    async fn set_thumbnail(&self, id: Uuid, key: &str) -> Result<(), AppError>;

    /// Count a failed thumbnail render and return the attempts so far.
    async fn record_thumbnail_failure(&self, id: Uuid) -> Result<i32, AppError>;

    /// Aggregate counts over all records. `storage_bytes` is the sum of recorded sizes.
    async fn usage_stats(&self) -> Result<UsageStats, AppError>;

    async fn record_metric_snapshot(&self, stats: UsageStats) -> Result<MetricSnapshot, AppError>;
}
