//! Storage backends.
//!
//! The cache persists exactly one blob — a JSON object mapping every
//! cache-key currently known to this backend to its entry — so a backend
//! only ever needs to load, store, and clear that single slot. This mirrors
//! the "whole-file overwrite on write, last-writer-wins" persistence model:
//! the cache logic in [`crate::Cache`] owns parsing, per-key lookup, and
//! expired-entry garbage collection; a backend can be as dumb as an
//! `Option<String>` or as careful as a file store with atomic rename.

use flagcore_error::{ErrorCode, FlagError};
use std::path::PathBuf;
use std::sync::Mutex;

/// The storage contract every cache backend implements: load, store, and
/// clear the single JSON blob backing this cache instance.
pub trait Storage: Send + Sync {
    /// Load the raw blob, or `None` if nothing has been stored yet.
    ///
    /// # Errors
    /// Returns an error if the backend itself fails (I/O error, poisoned
    /// lock). An absent blob is `Ok(None)`, not an error.
    fn load_raw(&self) -> Result<Option<String>, FlagError>;

    /// Persist `blob`, overwriting any existing value.
    ///
    /// # Errors
    /// Returns an error if the backend cannot persist the blob.
    fn store_raw(&self, blob: &str) -> Result<(), FlagError>;

    /// Remove the blob entirely, if present.
    ///
    /// # Errors
    /// Returns an error if the backend fails while attempting removal.
    fn clear_raw(&self) -> Result<(), FlagError>;
}

/// An in-process, non-persistent backend. The default for short-lived
/// processes and for tests.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    blob: Mutex<Option<String>>,
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn load_raw(&self) -> Result<Option<String>, FlagError> {
        Ok(self.blob.lock().map_err(|_| poisoned())?.clone())
    }

    fn store_raw(&self, blob: &str) -> Result<(), FlagError> {
        *self.blob.lock().map_err(|_| poisoned())? = Some(blob.to_string());
        Ok(())
    }

    fn clear_raw(&self) -> Result<(), FlagError> {
        *self.blob.lock().map_err(|_| poisoned())? = None;
        Ok(())
    }
}

fn poisoned() -> FlagError {
    FlagError::new(ErrorCode::Internal, "cache storage lock was poisoned by a panicked holder")
}

/// A file-backed backend: one blob file, whole-file overwrite on write via
/// a write-to-temp-then-rename so a reader never observes a torn write.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create a store backed by the single blob file at `path`. Parent
    /// directories are created lazily on first write, not here.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for FileStorage {
    fn load_raw(&self) -> Result<Option<String>, FlagError> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlagError::new(ErrorCode::CacheBlobInvalid, format!("read {}", self.path.display())).with_source(e)),
        }
    }

    fn store_raw(&self, blob: &str) -> Result<(), FlagError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| FlagError::new(ErrorCode::CacheBlobInvalid, format!("create cache dir {}", parent.display())).with_source(e))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, blob)
            .map_err(|e| FlagError::new(ErrorCode::CacheBlobInvalid, format!("write {}", tmp_path.display())).with_source(e))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| FlagError::new(ErrorCode::CacheBlobInvalid, format!("rename into {}", self.path.display())).with_source(e))?;
        Ok(())
    }

    fn clear_raw(&self) -> Result<(), FlagError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlagError::new(ErrorCode::CacheBlobInvalid, format!("remove {}", self.path.display())).with_source(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trips() {
        let storage = InMemoryStorage::new();
        storage.store_raw("hello").unwrap();
        assert_eq!(storage.load_raw().unwrap(), Some("hello".to_string()));
        storage.clear_raw().unwrap();
        assert_eq!(storage.load_raw().unwrap(), None);
    }

    #[test]
    fn in_memory_missing_blob_is_none_not_error() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.load_raw().unwrap(), None);
    }

    #[test]
    fn file_storage_round_trips_through_a_temp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("cache.json"));
        storage.store_raw("{\"ok\":true}").unwrap();
        assert_eq!(storage.load_raw().unwrap(), Some("{\"ok\":true}".to_string()));
    }

    #[test]
    fn file_storage_clear_of_absent_blob_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("never-written.json"));
        storage.clear_raw().unwrap();
    }

    #[test]
    fn file_storage_overwrites_via_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("cache.json"));
        storage.store_raw("first").unwrap();
        storage.store_raw("second").unwrap();
        assert_eq!(storage.load_raw().unwrap(), Some("second".to_string()));
    }
}
