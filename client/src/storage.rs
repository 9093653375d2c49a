//! Durable snapshot storage.
//!
//! The whole engine state is written as one JSON document under
//! [`STORAGE_NAMESPACE`]. Writes replace the document atomically, so a crash
//! leaves either the previous or the new snapshot, never a mix.

use crate::error::StorageError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasksync_engine::{Snapshot, STORAGE_NAMESPACE};
use tokio::sync::Mutex;

/// Where snapshots live.
pub trait SnapshotStorage: Send + Sync + 'static {
    /// Read the stored snapshot, `None` if nothing was stored yet.
    fn load(&self) -> impl Future<Output = Result<Option<Snapshot>, StorageError>> + Send;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &Snapshot) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Get rid of an unreadable snapshot so the next start is clean.
    fn discard(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Snapshot stored as a file in a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Store the snapshot in `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir
                .as_ref()
                .join(format!("{STORAGE_NAMESPACE}.json")),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl SnapshotStorage for FileStorage {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Snapshot::from_json(&json)?))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let json = snapshot.to_json()?;
        let tmp = self.sibling(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::trace!(path = %self.path.display(), "Snapshot written");
        Ok(())
    }

    async fn discard(&self) -> Result<(), StorageError> {
        let aside = self.sibling(".corrupt");
        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {
                tracing::warn!(path = %aside.display(), "Unreadable snapshot moved aside");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Snapshot kept in memory, as serialized JSON.
///
/// Clones share the same slot, which lets tests inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-filled with raw JSON.
    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(json.into()))),
        }
    }

    /// The raw stored document.
    pub async fn raw(&self) -> Option<String> {
        self.slot.lock().await.clone()
    }
}

impl SnapshotStorage for MemoryStorage {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        match self.slot.lock().await.as_deref() {
            Some(json) => Ok(Some(Snapshot::from_json(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let json = snapshot.to_json()?;
        *self.slot.lock().await = Some(json);
        Ok(())
    }

    async fn discard(&self) -> Result<(), StorageError> {
        *self.slot.lock().await = None;
        Ok(())
    }
}
