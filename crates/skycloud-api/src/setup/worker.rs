//! Lifecycle scheduler and thumbnail pool startup

use skycloud_core::Config;
use skycloud_db::FileRepository;
use skycloud_processing::{ChunkReassembler, MediaThumbnailer};
use skycloud_storage::Storage;
use skycloud_worker::{
    register_lifecycle_tasks, LifecycleContext, LifecycleScheduler, SchedulerHandle,
    ThumbnailCompletion, ThumbnailPool,
};
use std::sync::Arc;

/// Longest edge of generated thumbnails, in pixels.
const THUMBNAIL_MAX_DIMENSION: u32 = 320;

pub fn start_lifecycle(
    config: &Config,
    storage: Arc<dyn Storage>,
    repository: Arc<dyn FileRepository>,
    reassembler: Arc<ChunkReassembler>,
) -> SchedulerHandle {
    let tasks = config.tasks();

    let generator = Arc::new(MediaThumbnailer::new(
        tasks.ffmpeg_path.clone(),
        THUMBNAIL_MAX_DIMENSION,
    ));
    let (pool, mut completions) = ThumbnailPool::start(
        tasks.thumbnail_threads,
        tasks.thumbnail_queue_capacity,
        Arc::clone(&storage),
        Arc::clone(&repository),
        generator,
    );

    tokio::spawn(async move {
        while let Some(completion) = completions.recv().await {
            match completion {
                ThumbnailCompletion::Generated {
                    file_id,
                    thumbnail_key,
                } => tracing::info!(file_id = %file_id, thumbnail_key = %thumbnail_key, "Thumbnail ready"),
                ThumbnailCompletion::Failed { file_id, error } => {
                    tracing::warn!(file_id = %file_id, error = %error, "Thumbnail failed")
                }
            }
        }
    });

    let mut scheduler = LifecycleScheduler::new();
    register_lifecycle_tasks(
        &mut scheduler,
        tasks,
        LifecycleContext::new(storage, repository),
        reassembler,
        pool,
    );

    scheduler.start()
}
