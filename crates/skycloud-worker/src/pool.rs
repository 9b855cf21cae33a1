//! Thumbnail worker pool.
//!
//! A fixed number of long-lived workers pull jobs from one bounded queue. Results are
//! reported on a completion channel. A file id stays in the in-flight set from
//! submission until its worker finishes, so repeated feeder ticks never queue the same
//! file twice. Failed renders are counted on the record so files that keep failing
//! drop out of the backlog instead of blocking newer ones.

use skycloud_core::models::FileRecord;
use skycloud_db::FileRepository;
use skycloud_processing::{thumbnail_key, ThumbnailGenerator};
use skycloud_storage::Storage;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use skycloud_processing::thumbnail::THUMBNAIL_MIMETYPE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub file_id: Uuid,
    pub key: String,
    pub mimetype: String,
}

impl From<&FileRecord> for ThumbnailJob {
    fn from(file: &FileRecord) -> Self {
        Self {
            file_id: file.id,
            key: file.name.clone(),
            mimetype: file.mimetype.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailCompletion {
    Generated { file_id: Uuid, thumbnail_key: String },
    Failed { file_id: Uuid, error: String },
}

impl ThumbnailCompletion {
    pub fn file_id(&self) -> Uuid {
        match self {
            ThumbnailCompletion::Generated { file_id, .. } => *file_id,
            ThumbnailCompletion::Failed { file_id, .. } => *file_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// The file is already queued or being processed.
    AlreadyQueued,
    /// The queue is at capacity; try again on a later tick.
    Full,
    /// Every worker has exited.
    Closed,
}

struct Worker {
    storage: Arc<dyn Storage>,
    repository: Arc<dyn FileRepository>,
    generator: Arc<dyn ThumbnailGenerator>,
}

impl Worker {
    async fn process(&self, job: &ThumbnailJob) -> anyhow::Result<String> {
        let data = self
            .storage
            .read_all(&job.key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Object {} not found", job.key))?;

        let thumbnail = self.generator.generate(data, &job.mimetype).await?;

        let key = thumbnail_key(job.file_id);
        self.storage
            .put(&key, thumbnail, Some(THUMBNAIL_MIMETYPE))
            .await?;
        self.repository.set_thumbnail(job.file_id, &key).await?;

        Ok(key)
    }
}

/// Submission handle for the pool. Cloning shares the same queue.
#[derive(Clone)]
pub struct ThumbnailPool {
    sender: mpsc::Sender<ThumbnailJob>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    capacity: usize,
}

impl ThumbnailPool {
    /// Spawn `workers` workers sharing a queue of `capacity` jobs.
    ///
    /// Workers exit once every `ThumbnailPool` clone has been dropped and the queue is drained.
    pub fn start(
        workers: usize,
        capacity: usize,
        storage: Arc<dyn Storage>,
        repository: Arc<dyn FileRepository>,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> (Self, mpsc::UnboundedReceiver<ThumbnailCompletion>) {
        let workers = workers.max(1);
        let capacity = capacity.max(1);

        let (sender, receiver) = mpsc::channel::<ThumbnailJob>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let worker = Arc::new(Worker {
            storage,
            repository,
            generator,
        });

        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let worker = Arc::clone(&worker);
            let in_flight = Arc::clone(&in_flight);
            let completion_tx = completion_tx.clone();

            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };

                    let start = Instant::now();
                    let completion = match worker.process(&job).await {
                        Ok(thumbnail_key) => {
                            tracing::debug!(
                                worker_id,
                                file_id = %job.file_id,
                                thumbnail_key = %thumbnail_key,
                                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                                "Thumbnail generated"
                            );
                            ThumbnailCompletion::Generated {
                                file_id: job.file_id,
                                thumbnail_key,
                            }
                        }
                        Err(e) => {
                            let attempts = worker
                                .repository
                                .record_thumbnail_failure(job.file_id)
                                .await
                                .unwrap_or_else(|record_err| {
                                    tracing::warn!(
                                        file_id = %job.file_id,
                                        error = %record_err,
                                        "Failed to record thumbnail failure"
                                    );
                                    0
                                });
                            tracing::warn!(
                                worker_id,
                                file_id = %job.file_id,
                                key = %job.key,
                                attempts,
                                error = %e,
                                "Thumbnail generation failed"
                            );
                            ThumbnailCompletion::Failed {
                                file_id: job.file_id,
                                error: e.to_string(),
                            }
                        }
                    };

                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&job.file_id);
                    }
                    let _ = completion_tx.send(completion);
                }
                tracing::debug!(worker_id, "Thumbnail worker stopped");
            });
        }

        tracing::info!(workers, capacity, "Thumbnail pool started");

        (
            Self {
                sender,
                in_flight,
                capacity,
            },
            completion_rx,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs queued or being processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Queue a job without waiting for space.
    pub fn submit(&self, job: ThumbnailJob) -> SubmitOutcome {
        let file_id = job.file_id;
        {
            let Ok(mut set) = self.in_flight.lock() else {
                return SubmitOutcome::Closed;
            };
            if !set.insert(file_id) {
                return SubmitOutcome::AlreadyQueued;
            }
        }

        match self.sender.try_send(job) {
            Ok(()) => SubmitOutcome::Queued,
            Err(err) => {
                if let Ok(mut set) = self.in_flight.lock() {
                    set.remove(&file_id);
                }
                match err {
                    TrySendError::Full(_) => SubmitOutcome::Full,
                    TrySendError::Closed(_) => SubmitOutcome::Closed,
                }
            }
        }
    }
}
