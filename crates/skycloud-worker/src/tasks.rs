//! Lifecycle task handlers.

use crate::pool::{SubmitOutcome, ThumbnailJob, ThumbnailPool};
use crate::scheduler::{LifecycleScheduler, TaskHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use skycloud_core::models::FileRecord;
use skycloud_core::TasksConfig;
use skycloud_db::FileRepository;
use skycloud_processing::ChunkReassembler;
use skycloud_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

pub const DELETE_FILES_TASK: &str = "delete-files";
pub const MAX_VIEWS_TASK: &str = "max-views";
pub const PARTIAL_SWEEP_TASK: &str = "partial-sweep";
pub const THUMBNAILS_TASK: &str = "thumbnails";
pub const METRICS_TASK: &str = "metrics";

/// Collaborators shared by every lifecycle task.
#[derive(Clone)]
pub struct LifecycleContext {
    pub storage: Arc<dyn Storage>,
    pub repository: Arc<dyn FileRepository>,
}

impl LifecycleContext {
    pub fn new(storage: Arc<dyn Storage>, repository: Arc<dyn FileRepository>) -> Self {
        Self {
            storage,
            repository,
        }
    }

    /// Remove a file's object, its thumbnail, then its record.
    ///
    /// The record is kept when the object delete fails so the next sweep retries it.
    pub async fn delete_artifact(&self, file: &FileRecord) -> Result<()> {
        self.storage
            .delete(&file.name)
            .await
            .with_context(|| format!("Failed to delete object {}", file.name))?;

        if let Some(thumbnail) = &file.thumbnail {
            if let Err(e) = self.storage.delete(thumbnail).await {
                tracing::warn!(
                    file_id = %file.id,
                    key = %thumbnail,
                    error = %e,
                    "Failed to delete thumbnail"
                );
            }
        }

        self.repository
            .delete_file_record(file.id)
            .await
            .with_context(|| format!("Failed to delete record for {}", file.name))?;

        Ok(())
    }

    async fn delete_all(&self, task: &str, files: Vec<FileRecord>) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;
        for file in files {
            match self.delete_artifact(&file).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(task = task, file_id = %file.id, name = %file.name, "Deleted file");
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(task = task, file_id = %file.id, error = %e, "Failed to delete file");
                }
            }
        }
        (deleted, failed)
    }
}

/// Deletes files whose expiry has passed.
pub struct ExpirySweep {
    ctx: LifecycleContext,
}

impl ExpirySweep {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for ExpirySweep {
    #[tracing::instrument(skip(self), fields(task = DELETE_FILES_TASK))]
    async fn run(&self) -> Result<()> {
        let expired = self.ctx.repository.find_expired(Utc::now()).await?;
        if expired.is_empty() {
            return Ok(());
        }

        let (deleted, failed) = self.ctx.delete_all(DELETE_FILES_TASK, expired).await;
        tracing::debug!(deleted, failed, "Expiry sweep finished");
        Ok(())
    }
}

/// Deletes files that reached their view limit.
pub struct MaxViewsSweep {
    ctx: LifecycleContext,
}

impl MaxViewsSweep {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for MaxViewsSweep {
    #[tracing::instrument(skip(self), fields(task = MAX_VIEWS_TASK))]
    async fn run(&self) -> Result<()> {
        let maxed = self.ctx.repository.find_max_viewed().await?;
        if maxed.is_empty() {
            return Ok(());
        }

        let (deleted, failed) = self.ctx.delete_all(MAX_VIEWS_TASK, maxed).await;
        tracing::debug!(deleted, failed, "Max views sweep finished");
        Ok(())
    }
}

/// Evicts abandoned chunk sessions.
pub struct PartialSweep {
    reassembler: Arc<ChunkReassembler>,
}

impl PartialSweep {
    pub fn new(reassembler: Arc<ChunkReassembler>) -> Self {
        Self { reassembler }
    }
}

#[async_trait]
impl TaskHandler for PartialSweep {
    async fn run(&self) -> Result<()> {
        let evicted = self.reassembler.evict_stale().await;
        if evicted > 0 {
            tracing::debug!(task = PARTIAL_SWEEP_TASK, evicted, "Evicted stale chunk sessions");
        }
        Ok(())
    }
}

/// Feeds files missing a thumbnail into the worker pool.
pub struct ThumbnailFeeder {
    repository: Arc<dyn FileRepository>,
    pool: ThumbnailPool,
}

impl ThumbnailFeeder {
    pub fn new(repository: Arc<dyn FileRepository>, pool: ThumbnailPool) -> Self {
        Self { repository, pool }
    }
}

#[async_trait]
impl TaskHandler for ThumbnailFeeder {
    async fn run(&self) -> Result<()> {
        let limit = self.pool.capacity() as i64;
        let pending = self.repository.find_missing_thumbnails(limit).await?;

        let mut queued = 0usize;
        for file in pending {
            match self.pool.submit(ThumbnailJob::from(&file)) {
                SubmitOutcome::Queued => queued += 1,
                SubmitOutcome::AlreadyQueued => {}
                SubmitOutcome::Full => break,
                SubmitOutcome::Closed => anyhow::bail!("Thumbnail pool is closed"),
            }
        }

        if queued > 0 {
            tracing::debug!(task = THUMBNAILS_TASK, queued, "Queued thumbnail jobs");
        }
        Ok(())
    }
}

/// Persists a usage snapshot.
pub struct MetricsSnapshotTask {
    ctx: LifecycleContext,
}

impl MetricsSnapshotTask {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for MetricsSnapshotTask {
    #[tracing::instrument(skip(self), fields(task = METRICS_TASK))]
    async fn run(&self) -> Result<()> {
        let mut stats = self.ctx.repository.usage_stats().await?;

        match self.ctx.storage.total_size().await {
            Ok(bytes) => stats.storage_bytes = bytes,
            Err(e) => tracing::warn!(
                error = %e,
                "Failed to measure backend size, using recorded file sizes"
            ),
        }

        let snapshot = self.ctx.repository.record_metric_snapshot(stats).await?;
        tracing::debug!(
            snapshot_id = %snapshot.id,
            files = snapshot.data.files,
            storage_bytes = snapshot.data.storage_bytes,
            views = snapshot.data.views,
            "Metrics snapshot recorded"
        );
        Ok(())
    }
}

/// Register every lifecycle task with its configured period.
pub fn register_lifecycle_tasks(
    scheduler: &mut LifecycleScheduler,
    tasks: &TasksConfig,
    ctx: LifecycleContext,
    reassembler: Arc<ChunkReassembler>,
    pool: ThumbnailPool,
) {
    scheduler
        .register(
            DELETE_FILES_TASK,
            Duration::from_secs(tasks.delete_interval_secs),
            Arc::new(ExpirySweep::new(ctx.clone())),
        )
        .register(
            MAX_VIEWS_TASK,
            Duration::from_secs(tasks.max_views_interval_secs),
            Arc::new(MaxViewsSweep::new(ctx.clone())),
        )
        .register(
            PARTIAL_SWEEP_TASK,
            Duration::from_secs(tasks.partial_sweep_interval_secs),
            Arc::new(PartialSweep::new(reassembler)),
        )
        .register(
            THUMBNAILS_TASK,
            Duration::from_secs(tasks.thumbnails_interval_secs),
            Arc::new(ThumbnailFeeder::new(Arc::clone(&ctx.repository), pool)),
        )
        .register(
            METRICS_TASK,
            Duration::from_secs(tasks.metrics_interval_secs),
            Arc::new(MetricsSnapshotTask::new(ctx)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;
    use skycloud_core::models::NewFileRecord;
    use skycloud_db::InMemoryFileRepository;
    use skycloud_storage::LocalStorage;
    use tempfile::{tempdir, TempDir};

    async fn context() -> (TempDir, LifecycleContext, Arc<InMemoryFileRepository>) {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
        let repo = Arc::new(InMemoryFileRepository::new());
        let ctx = LifecycleContext::new(storage, repo.clone());
        (dir, ctx, repo)
    }

    async fn stored_file(
        ctx: &LifecycleContext,
        repo: &InMemoryFileRepository,
        name: &str,
        size: usize,
        deletes_at: Option<chrono::DateTime<Utc>>,
    ) -> FileRecord {
        ctx.storage
            .put(name, Bytes::from(vec![0u8; size]), Some("text/plain"))
            .await
            .unwrap();
        repo.create_file_record(NewFileRecord {
            name: name.to_string(),
            original_name: None,
            mimetype: "text/plain".to_string(),
            size: size as i64,
            deletes_at,
            max_views: None,
            password: None,
            folder_id: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn expiry_sweep_deletes_only_expired() {
        let (_dir, ctx, repo) = context().await;
        let now = Utc::now();
        stored_file(&ctx, &repo, "old.txt", 10, Some(now - ChronoDuration::minutes(5))).await;
        stored_file(&ctx, &repo, "new.txt", 10, Some(now + ChronoDuration::hours(1))).await;
        stored_file(&ctx, &repo, "forever.txt", 10, None).await;

        ExpirySweep::new(ctx.clone()).run().await.unwrap();

        assert!(ctx.storage.read_all("old.txt").await.unwrap().is_none());
        assert!(repo.get_by_name("old.txt").await.unwrap().is_none());
        assert!(ctx.storage.read_all("new.txt").await.unwrap().is_some());
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn thumbnails_are_deleted_with_their_file() {
        let (_dir, ctx, repo) = context().await;
        let file = stored_file(&ctx, &repo, "pic.txt", 4, Some(Utc::now() - ChronoDuration::seconds(1))).await;
        ctx.storage
            .put(".thumbnail.x.jpg", Bytes::from_static(b"jpg"), Some("image/jpeg"))
            .await
            .unwrap();
        repo.set_thumbnail(file.id, ".thumbnail.x.jpg").await.unwrap();

        ExpirySweep::new(ctx.clone()).run().await.unwrap();

        assert!(ctx.storage.read_all(".thumbnail.x.jpg").await.unwrap().is_none());
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn metrics_snapshot_uses_backend_size() {
        let (_dir, ctx, repo) = context().await;
        stored_file(&ctx, &repo, "a.txt", 100, None).await;
        stored_file(&ctx, &repo, "b.txt", 50, None).await;
        // An object without a record still counts towards the backend total.
        ctx.storage
            .put("orphan.bin", Bytes::from(vec![1u8; 25]), None)
            .await
            .unwrap();

        MetricsSnapshotTask::new(ctx).run().await.unwrap();

        let snapshots = repo.snapshots().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].data.files, 2);
        assert_eq!(snapshots[0].data.storage_bytes, 175);
        assert_eq!(snapshots[0].data.types.get("text/plain"), Some(&2));
    }

    #[tokio::test]
    async fn partial_sweep_evicts_idle_sessions() {
        let (dir, ctx, _repo) = context().await;
        let reassembler = Arc::new(ChunkReassembler::new(
            ctx.storage.clone(),
            dir.path().join("partials"),
            std::time::Duration::ZERO,
            1024,
        ));
        let partial = skycloud_core::models::PartialDescriptor {
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            identifier: "abc".to_string(),
            last_chunk: false,
            range: [0, 3, 8],
            content_length: 4,
        };
        reassembler
            .accept_chunk(&partial, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        assert_eq!(reassembler.active_sessions(), 1);

        PartialSweep::new(reassembler.clone()).run().await.unwrap();
        assert_eq!(reassembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn all_tasks_are_registered() {
        let (dir, ctx, repo) = context().await;
        let reassembler = Arc::new(ChunkReassembler::new(
            ctx.storage.clone(),
            dir.path().join("partials"),
            std::time::Duration::from_secs(60),
            1024,
        ));
        let (pool, _completions) = ThumbnailPool::start(
            1,
            4,
            ctx.storage.clone(),
            repo,
            Arc::new(skycloud_processing::MediaThumbnailer::new("ffmpeg", 64)),
        );

        let mut scheduler = LifecycleScheduler::new();
        register_lifecycle_tasks(&mut scheduler, &TasksConfig::default(), ctx, reassembler, pool);

        assert_eq!(
            scheduler.task_names(),
            vec![
                DELETE_FILES_TASK,
                MAX_VIEWS_TASK,
                METRICS_TASK,
                PARTIAL_SWEEP_TASK,
                THUMBNAILS_TASK
            ]
        );
    }
}
