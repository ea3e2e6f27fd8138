//! Persistence backends for the record store.
//!
//! The store keeps its working set in memory and hands every committed
//! snapshot to a [`Persistence`] backend. A backend error aborts the commit,
//! so the in-memory state never runs ahead of what was durably written.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{StoreError, StoreResult};
use super::Snapshot;

/// Durable home for store snapshots.
pub trait Persistence: Send + Sync {
    /// Load the last committed snapshot, if any.
    fn load(&self) -> StoreResult<Option<Snapshot>>;

    /// Write a snapshot. Returning an error rolls back the transaction.
    fn save(&self, snapshot: &Snapshot) -> StoreResult<()>;
}

/// Backend that keeps nothing beyond process lifetime.
#[derive(Debug, Default)]
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn load(&self) -> StoreResult<Option<Snapshot>> {
        Ok(None)
    }

    fn save(&self, _snapshot: &Snapshot) -> StoreResult<()> {
        Ok(())
    }
}

/// Backend writing the snapshot as a JSON document.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> StoreResult<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(|e| Self::io_error(&self.path, e))?;
        let snapshot = serde_json::from_slice(&data)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
            }
        }

        let data = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, data).map_err(|e| Self::io_error(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| Self::io_error(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{BatchContext, BatchId, TransferBatch, UploadContext};
    use tempfile::TempDir;

    #[test]
    fn test_memory_persistence_loads_nothing() {
        let persistence = MemoryPersistence;
        assert!(persistence.load().unwrap().is_none());
        assert!(persistence.save(&Snapshot::default()).is_ok());
    }

    #[test]
    fn test_json_file_missing_loads_none() {
        let dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("store.json"));
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_json_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("nested/store.json"));

        let mut snapshot = Snapshot::default();
        let batch = TransferBatch::new(
            BatchId::from("assignment-9"),
            BatchContext::Upload {
                context: UploadContext::User,
            },
        );
        snapshot.batches.insert(batch.id.clone(), batch);

        persistence.save(&snapshot).unwrap();
        let loaded = persistence.load().unwrap().unwrap();

        assert_eq!(loaded.batches.len(), 1);
        assert!(loaded.batches.contains_key(&BatchId::from("assignment-9")));
        assert!(!persistence.temp_path().exists());
    }

    #[test]
    fn test_json_file_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{ not json").unwrap();

        let persistence = JsonFilePersistence::new(&path);
        assert!(matches!(
            persistence.load(),
            Err(StoreError::Serialization(_))
        ));
    }
}
