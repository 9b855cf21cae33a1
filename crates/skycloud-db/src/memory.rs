use crate::repository::FileRepository;
use chrono::{DateTime, Utc};
use skycloud_core::models::{FileRecord, MetricSnapshot, NewFileRecord, UsageStats};
use skycloud_core::AppError;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local repository used when `DATABASE_URL` is unset.
///
/// Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryFileRepository {
    files: RwLock<HashMap<Uuid, FileRecord>>,
    snapshots: RwLock<Vec<MetricSnapshot>>,
}

impl InMemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded metric snapshots, oldest first.
    pub async fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.snapshots.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl FileRepository for InMemoryFileRepository {
    async fn create_file_record(&self, file: NewFileRecord) -> Result<FileRecord, AppError> {
        let mut files = self.files.write().await;
        if files.values().any(|existing| existing.name == file.name) {
            return Err(AppError::Conflict(format!(
                "A file named {} already exists",
                file.name
            )));
        }

        let record = file.into_record(Uuid::new_v4(), Utc::now());
        files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<FileRecord>, AppError> {
        let files = self.files.read().await;
        Ok(files.values().find(|file| file.name == name).cloned())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError> {
        let files = self.files.read().await;
        let mut expired: Vec<FileRecord> = files
            .values()
            .filter(|file| file.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|file| file.deletes_at);
        Ok(expired)
    }

    async fn find_max_viewed(&self) -> Result<Vec<FileRecord>, AppError> {
        let files = self.files.read().await;
        Ok(files
            .values()
            .filter(|file| file.has_reached_max_views())
            .cloned()
            .collect())
    }

    async fn increment_view_count(&self, id: Uuid) -> Result<i64, AppError> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))?;
        file.views += 1;
        Ok(file.views)
    }

    async fn delete_file_record(&self, id: Uuid) -> Result<(), AppError> {
        self.files.write().await.remove(&id);
        Ok(())
    }

    async fn find_missing_thumbnails(&self, limit: i64) -> Result<Vec<FileRecord>, AppError> {
        let files = self.files.read().await;
        let mut pending: Vec<FileRecord> = files
            .values()
            .filter(|file| file.wants_thumbnail())
            .cloned()
            .collect();
        pending.sort_by_key(|file| file.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn set_thumbnail(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        if let Some(file) = self.files.write().await.get_mut(&id) {
            file.thumbnail = Some(key.to_string());
        }
        Ok(())
    }

    async fn record_thumbnail_failure(&self, id: Uuid) -> Result<i32, AppError> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))?;
        file.thumbnail_attempts += 1;
        Ok(file.thumbnail_attempts)
    }

    async fn usage_stats(&self) -> Result<UsageStats, AppError> {
        let files = self.files.read().await;
        let mut types = BTreeMap::new();
        for file in files.values() {
            *types.entry(file.mimetype.clone()).or_insert(0u64) += 1;
        }

        Ok(UsageStats {
            files: files.len() as u64,
            storage_bytes: files.values().map(|f| f.size.max(0) as u64).sum(),
            views: files.values().map(|f| f.views.max(0) as u64).sum(),
            types,
        })
    }

    async fn record_metric_snapshot(&self, stats: UsageStats) -> Result<MetricSnapshot, AppError> {
        let snapshot = MetricSnapshot {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            data: stats,
        };
        self.snapshots.write().await.push(snapshot.clone());
        Ok(snapshot)
    }
}
