//! Resumable upload reassembly.
//!
//! Each logical upload is a session keyed by its client identifier. Chunks may arrive
//! in any order and are written at their declared offset into a temporary file. The
//! session is assembled once a chunk flagged as last has been received and the accepted
//! byte ranges cover `[0, total)` without gaps. The caller then claims a storage key
//! and calls [`ChunkReassembler::finalize`], which writes the assembled bytes through
//! the storage backend exactly once.
//!
//! The registry lock is only held to look up or insert sessions. Chunk writes hold the
//! per-session lock, so a given identifier has a single writer while different
//! identifiers proceed in parallel.

use super::directive::{CONTENT_RANGE, PARTIAL_CONTENT_LENGTH};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use skycloud_core::models::PartialDescriptor;
use skycloud_core::AppError;
use skycloud_storage::Storage;
use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Accumulating,
    /// Every byte is present; waiting for the caller to finalize under a key.
    Assembled,
    Finalized,
    /// Evicted by the sweep; the session must not be written again.
    Abandoned,
}

struct ChunkSession {
    filename: String,
    content_type: String,
    total: u64,
    /// Sorted, non-overlapping, half-open byte intervals already written.
    intervals: Vec<(u64, u64)>,
    last_chunk_seen: bool,
    temp_path: PathBuf,
    state: SessionState,
    created_at: Instant,
    last_activity: Instant,
}

impl ChunkSession {
    fn received(&self) -> u64 {
        self.intervals.iter().map(|(start, end)| end - start).sum()
    }

    fn is_complete(&self) -> bool {
        self.intervals.as_slice() == [(0, self.total)]
    }
}

/// Merge `[start, end)` into a sorted list of disjoint intervals.
fn insert_interval(intervals: &mut Vec<(u64, u64)>, start: u64, end: u64) {
    let mut merged = Vec::with_capacity(intervals.len() + 1);
    let (mut new_start, mut new_end) = (start, end);
    let mut placed = false;

    for &(s, e) in intervals.iter() {
        if e < new_start {
            merged.push((s, e));
        } else if s > new_end {
            if !placed {
                merged.push((new_start, new_end));
                placed = true;
            }
            merged.push((s, e));
        } else {
            new_start = new_start.min(s);
            new_end = new_end.max(e);
        }
    }
    if !placed {
        merged.push((new_start, new_end));
    }

    *intervals = merged;
}

/// An upload whose bytes are complete but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledUpload {
    pub identifier: String,
    pub size: u64,
    pub mimetype: String,
    pub original_name: String,
}

/// An upload that has been fully reassembled and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedUpload {
    pub key: String,
    pub size: u64,
    pub mimetype: String,
    pub original_name: String,
}

/// Result of accepting one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Stored; the upload is still incomplete.
    Accepted {
        identifier: String,
        received: u64,
        total: u64,
    },
    /// Complete; pass the identifier to [`ChunkReassembler::finalize`].
    Assembled(AssembledUpload),
}

/// Owns every in-flight chunk session.
pub struct ChunkReassembler {
    storage: Arc<dyn Storage>,
    temp_dir: PathBuf,
    session_timeout: Duration,
    max_upload_size: u64,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ChunkSession>>>>,
}

impl ChunkReassembler {
    pub fn new(
        storage: Arc<dyn Storage>,
        temp_dir: impl Into<PathBuf>,
        session_timeout: Duration,
        max_upload_size: u64,
    ) -> Self {
        Self {
            storage,
            temp_dir: temp_dir.into(),
            session_timeout,
            max_upload_size,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Temp file for an identifier. Hashing keeps arbitrary client identifiers out of paths.
    pub fn temp_path(&self, identifier: &str) -> PathBuf {
        let digest = Sha256::digest(identifier.as_bytes());
        self.temp_dir
            .join(format!("partial_{}", hex::encode(digest)))
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    fn lookup_or_create(
        &self,
        partial: &PartialDescriptor,
    ) -> Result<Arc<tokio::sync::Mutex<ChunkSession>>, AppError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| AppError::Internal("Chunk session registry poisoned".to_string()))?;

        let session = sessions
            .entry(partial.identifier.clone())
            .or_insert_with(|| {
                let now = Instant::now();
                tracing::debug!(
                    identifier = %partial.identifier,
                    filename = %partial.filename,
                    total = partial.total(),
                    "Chunk session created"
                );
                Arc::new(tokio::sync::Mutex::new(ChunkSession {
                    filename: partial.filename.clone(),
                    content_type: partial.content_type.clone(),
                    total: partial.total(),
                    intervals: Vec::new(),
                    last_chunk_seen: false,
                    temp_path: self.temp_path(&partial.identifier),
                    state: SessionState::Accumulating,
                    created_at: now,
                    last_activity: now,
                }))
            });

        Ok(Arc::clone(session))
    }

    fn existing(&self, identifier: &str) -> Result<Arc<tokio::sync::Mutex<ChunkSession>>, AppError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| AppError::Internal("Chunk session registry poisoned".to_string()))?;
        sessions
            .get(identifier)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Upload {} not found", identifier)))
    }

    /// Accept one chunk.
    ///
    /// Returns [`ChunkOutcome::Assembled`] once the upload is complete. Further chunks for
    /// the identifier are rejected with `Conflict` until it is finalized or released.
    pub async fn accept_chunk(
        &self,
        partial: &PartialDescriptor,
        payload: Bytes,
    ) -> Result<ChunkOutcome, AppError> {
        let (start, end, total) = (partial.start(), partial.end(), partial.total());
        if start > end || end >= total {
            return Err(AppError::validation(
                CONTENT_RANGE,
                format!("Invalid chunk range {}-{}/{}", start, end, total),
            ));
        }

        if total > self.max_upload_size {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload of {} bytes exceeds the maximum of {} bytes",
                total, self.max_upload_size
            )));
        }

        let actual = payload.len() as u64;
        if actual != partial.content_length {
            return Err(AppError::validation(
                PARTIAL_CONTENT_LENGTH,
                format!(
                    "Chunk length {} does not match declared content length {}",
                    actual, partial.content_length
                ),
            ));
        }
        if actual != partial.declared_len() {
            return Err(AppError::validation(
                CONTENT_RANGE,
                format!(
                    "Chunk length {} does not match declared range {}-{}",
                    actual, start, end
                ),
            ));
        }

        // A session evicted between lookup and lock is replaced by a fresh one.
        let mut session = loop {
            let session_ref = self.lookup_or_create(partial)?;
            let guard = session_ref.lock_owned().await;
            if guard.state != SessionState::Abandoned {
                break guard;
            }
        };

        match session.state {
            SessionState::Finalized => {
                return Err(AppError::Conflict(format!(
                    "Upload {} has already been finalized",
                    partial.identifier
                )));
            }
            SessionState::Assembled => {
                return Err(AppError::Conflict(format!(
                    "Upload {} is being finalized",
                    partial.identifier
                )));
            }
            SessionState::Accumulating | SessionState::Abandoned => {}
        }

        if session.filename != partial.filename
            || session.content_type != partial.content_type
            || session.total != total
        {
            tracing::warn!(
                identifier = %partial.identifier,
                expected_filename = %session.filename,
                filename = %partial.filename,
                expected_content_type = %session.content_type,
                content_type = %partial.content_type,
                "Chunk metadata conflicts with existing session"
            );
            return Err(AppError::Conflict(format!(
                "Chunk metadata for upload {} does not match the existing session",
                partial.identifier
            )));
        }

        self.write_chunk(&session.temp_path, start, &payload).await?;

        insert_interval(&mut session.intervals, start, end + 1);
        session.last_chunk_seen |= partial.last_chunk;
        session.last_activity = Instant::now();

        let received = session.received();
        tracing::debug!(
            identifier = %partial.identifier,
            start = start,
            end = end,
            received = received,
            total = session.total,
            "Chunk accepted"
        );

        if !(session.last_chunk_seen && session.is_complete()) {
            return Ok(ChunkOutcome::Accepted {
                identifier: partial.identifier.clone(),
                received,
                total: session.total,
            });
        }

        let on_disk = fs::metadata(&session.temp_path).await?.len();
        if on_disk != session.total {
            return Err(AppError::Internal(format!(
                "Reassembled upload {} has {} bytes, expected {}",
                partial.identifier, on_disk, session.total
            )));
        }

        session.state = SessionState::Assembled;
        tracing::debug!(identifier = %partial.identifier, size_bytes = on_disk, "Chunked upload assembled");

        Ok(ChunkOutcome::Assembled(AssembledUpload {
            identifier: partial.identifier.clone(),
            size: session.total,
            mimetype: session.content_type.clone(),
            original_name: session.filename.clone(),
        }))
    }

    /// Write an assembled upload to storage under `key`.
    ///
    /// On a storage failure the session goes back to accumulating, so resending any
    /// chunk assembles it again.
    pub async fn finalize(&self, identifier: &str, key: &str) -> Result<FinalizedUpload, AppError> {
        let mut session = self.existing(identifier)?.lock_owned().await;
        if session.state != SessionState::Assembled {
            return Err(AppError::Conflict(format!(
                "Upload {} is not ready to be finalized",
                identifier
            )));
        }

        let stored = match fs::read(&session.temp_path).await {
            Ok(data) => self
                .storage
                .put(key, Bytes::from(data), Some(&session.content_type))
                .await
                .map_err(AppError::from),
            Err(e) => Err(AppError::from(e)),
        };
        if let Err(e) = stored {
            session.state = SessionState::Accumulating;
            session.last_activity = Instant::now();
            return Err(e);
        }

        if let Err(e) = fs::remove_file(&session.temp_path).await {
            tracing::warn!(
                path = %session.temp_path.display(),
                error = %e,
                "Failed to remove chunk temp file"
            );
        }
        session.state = SessionState::Finalized;
        session.last_activity = Instant::now();

        tracing::info!(
            identifier = %identifier,
            key = %key,
            size_bytes = session.total,
            duration_ms = session.created_at.elapsed().as_secs_f64() * 1000.0,
            "Chunked upload finalized"
        );

        Ok(FinalizedUpload {
            key: key.to_string(),
            size: session.total,
            mimetype: session.content_type.clone(),
            original_name: session.filename.clone(),
        })
    }

    /// Return an assembled upload to accumulating without storing it.
    pub async fn release(&self, identifier: &str) {
        let Ok(session_ref) = self.existing(identifier) else {
            return;
        };
        let mut session = session_ref.lock().await;
        if session.state == SessionState::Assembled {
            session.state = SessionState::Accumulating;
            session.last_activity = Instant::now();
        }
    }

    async fn write_chunk(&self, path: &Path, offset: u64, payload: &[u8]) -> Result<(), AppError> {
        fs::create_dir_all(&self.temp_dir).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(payload).await?;
        file.flush().await?;

        Ok(())
    }

    /// Drop sessions idle for longer than the session timeout, including finalized
    /// tombstones, and delete their temp files. Sessions busy with a chunk are skipped.
    ///
    /// Returns the number of sessions removed.
    pub async fn evict_stale(&self) -> usize {
        let candidates: Vec<(String, Arc<tokio::sync::Mutex<ChunkSession>>)> =
            match self.sessions.lock() {
                Ok(sessions) => sessions
                    .iter()
                    .map(|(id, session)| (id.clone(), Arc::clone(session)))
                    .collect(),
                Err(_) => return 0,
            };

        let mut evicted = 0;
        for (identifier, session_ref) in candidates {
            let Ok(mut session) = session_ref.try_lock() else {
                continue;
            };
            if session.last_activity.elapsed() < self.session_timeout {
                continue;
            }

            let was_finalized = session.state == SessionState::Finalized;
            session.state = SessionState::Abandoned;

            match fs::remove_file(&session.temp_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    identifier = %identifier,
                    path = %session.temp_path.display(),
                    error = %e,
                    "Failed to remove abandoned chunk file"
                ),
            }

            if let Ok(mut sessions) = self.sessions.lock() {
                if sessions
                    .get(&identifier)
                    .is_some_and(|current| Arc::ptr_eq(current, &session_ref))
                {
                    sessions.remove(&identifier);
                }
            }

            if !was_finalized {
                tracing::info!(
                    identifier = %identifier,
                    received = session.received(),
                    total = session.total,
                    "Abandoned chunk session evicted"
                );
            }
            evicted += 1;
        }

        evicted
    }
}
