use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::{Collection, StorageError};

/// Handle to the on-disk subscription document.
///
/// Cloning is cheap; every clone shares the same write lock, so saves issued
/// from different tasks never interleave on disk.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    max_episodes: usize,
    write_lock: Arc<Mutex<()>>,
}

/// An encoded snapshot waiting to be written.
///
/// Holds the store's write permit from the moment the snapshot was taken, so
/// snapshots reach the disk in the order they were prepared.
pub struct PendingWrite {
    permit: OwnedMutexGuard<()>,
    path: PathBuf,
    bytes: Vec<u8>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>, max_episodes: usize) -> Self {
        Self {
            path: path.into(),
            max_episodes,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_episodes(&self) -> usize {
        self.max_episodes
    }

    /// Reads the persisted collection.
    ///
    /// Never fails: a missing file yields an empty collection, and so does an
    /// unreadable or corrupt one (after logging it and moving the corrupt file
    /// aside so the next save cannot destroy it).
    pub async fn load(&self) -> Collection {
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || load_blocking(&path)).await {
            Ok(collection) => collection,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Store load task failed, starting empty");
                Collection::new()
            }
        }
    }

    /// Truncates and writes the whole collection.
    ///
    /// On failure the previous file is left untouched and the error is
    /// returned after being logged.
    pub async fn save(&self, collection: &mut Collection) -> Result<(), StorageError> {
        self.prepare(collection).await?.commit().await
    }

    /// Truncates and encodes `collection`, reserving the next write slot.
    ///
    /// Callers holding a lock on the live collection can release it as soon as
    /// this returns and run [`PendingWrite::commit`] afterwards.
    pub async fn prepare(&self, collection: &mut Collection) -> Result<PendingWrite, StorageError> {
        truncate(collection, self.max_episodes);
        let permit = Arc::clone(&self.write_lock).lock_owned().await;
        let bytes = encode(collection)?;
        Ok(PendingWrite {
            permit,
            path: self.path.clone(),
            bytes,
        })
    }
}

impl PendingWrite {
    /// Writes the snapshot atomically on the blocking pool.
    pub async fn commit(self) -> Result<(), StorageError> {
        let PendingWrite {
            permit,
            path,
            bytes,
        } = self;
        let target = path.clone();
        let size = bytes.len();

        // The permit travels with the write so it is released only once the
        // file is in place, even if the awaiting task is aborted.
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            atomic_write(&target, &bytes)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))
        .and_then(|r| r);

        match &result {
            Ok(()) => tracing::debug!(path = %path.display(), bytes = size, "Subscriptions saved"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to save subscriptions, previous file kept"),
        }
        result
    }
}

/// Keeps only the first `max` (newest) episodes of every subscription.
///
/// Returns the number of episodes dropped.
pub fn truncate(collection: &mut Collection, max: usize) -> usize {
    let mut dropped = 0;
    for (name, sub) in collection.iter_mut() {
        if sub.episodes.len() > max {
            tracing::debug!(name = %name, episodes = sub.episodes.len(), max = max, "Truncating episode history");
            dropped += sub.episodes.len() - max;
            sub.episodes.truncate(max);
        }
    }
    dropped
}

/// Serializes the collection as pretty-printed JSON.
pub fn encode(collection: &Collection) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(collection).map_err(StorageError::Encode)
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Collection, StorageError> {
    serde_json::from_slice(bytes).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn load_blocking(path: &Path) -> Collection {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No subscription store yet, starting empty");
            return Collection::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read subscription store, starting empty");
            return Collection::new();
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        tracing::debug!(path = %path.display(), "Subscription store is empty");
        return Collection::new();
    }

    match decode(path, &bytes) {
        Ok(collection) => {
            tracing::debug!(path = %path.display(), feeds = collection.len(), "Loaded subscriptions");
            collection
        }
        Err(e) => {
            tracing::warn!(error = %e, "Starting with empty subscriptions");
            quarantine(path);
            Collection::new()
        }
    }
}

/// Moves a corrupt store file to a timestamped sibling.
fn quarantine(path: &Path) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subscriptions.json".to_string());
    let backup = path.with_file_name(format!(
        "{}.corrupt.{}",
        file_name,
        Utc::now().format("%Y%m%d_%H%M%S")
    ));

    match std::fs::rename(path, &backup) {
        Ok(()) => {
            tracing::warn!(backup = %backup.display(), "Corrupt subscription store moved aside")
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to move corrupt subscription store aside")
        }
    }
}

/// Write-to-temp-then-rename so the destination is never left half written.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let io_err = |source: std::io::Error| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    // SEC-009: Randomized temp filename so the path cannot be pre-created
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(io_err)?;

    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(e));
    }

    // Windows refuses to rename over an existing file
    #[cfg(windows)]
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(io_err(e));
        }
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(e));
    }

    Ok(())
}
