//! Object-store traits for reading and writing index data
//!
//! The indexing engine talks to storage through these traits; drivers for
//! local filesystems, S3, or HTTP implement them. The contract is blocking
//! `get`/`put`; concurrency lives in the caller's thread pools, never here.
//!
//! ## Traits
//!
//! - `StorageRead`: read-only access (get, exists)
//! - `StorageWrite`: mutating operations (put, delete)
//! - `ObjectStore`: marker combining both
//!
//! Durability is per-put: a successful `put` is the only persistence claim
//! this layer makes.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use sha2::Digest;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};

/// Attempts made by `ensure_get`/`ensure_put` before surfacing a failure.
const RETRY_LIMIT: u32 = 8;

/// Read-only storage operations.
pub trait StorageRead: Debug + Send + Sync {
    /// Read raw bytes at the given path, relative to the store root.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Check whether an object exists at the given path.
    fn exists(&self, path: &str) -> Result<bool>;
}

/// Mutating storage operations.
pub trait StorageWrite: Debug + Send + Sync {
    /// Write bytes at the given path, overwriting any existing object.
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Delete an object. Idempotent: deleting a missing object succeeds.
    fn delete(&self, path: &str) -> Result<()>;
}

/// Full storage capability marker.
pub trait ObjectStore: StorageRead + StorageWrite {}
impl<T: StorageRead + StorageWrite> ObjectStore for T {}

/// `get` with bounded retries. `NotFound` is surfaced immediately; transient
/// failures are retried with a linear backoff.
pub fn ensure_get(store: &dyn ObjectStore, path: &str) -> Result<Vec<u8>> {
    let mut tries = 0;
    loop {
        match store.get(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => {
                tries += 1;
                if tries >= RETRY_LIMIT {
                    return Err(e);
                }
                tracing::warn!(path, attempt = tries, error = %e, "get failed, retrying");
                std::thread::sleep(std::time::Duration::from_secs(tries as u64));
            }
        }
    }
}

/// `put` with bounded retries and linear backoff.
pub fn ensure_put(store: &dyn ObjectStore, path: &str, bytes: &[u8]) -> Result<()> {
    let mut tries = 0;
    loop {
        match store.put(path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tries += 1;
                if tries >= RETRY_LIMIT {
                    return Err(e);
                }
                tracing::warn!(path, attempt = tries, error = %e, "put failed, retrying");
                std::thread::sleep(std::time::Duration::from_secs(tries as u64));
            }
        }
    }
}

/// Compute the SHA-256 hash of bytes as a hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// MemoryStore
// ============================================================================

/// A simple in-memory store.
///
/// Backed by a `HashMap` behind a `RwLock`; useful for tests and for
/// assembling small builds entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored paths, unordered.
    pub fn paths(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl StorageRead for MemoryStore {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(path))
    }
}

impl StorageWrite for MemoryStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.data.write().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.data.write().remove(path);
        Ok(())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// Filesystem-backed store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a store path against the base directory.
    ///
    /// Absolute paths and parent traversal are rejected so a store path can
    /// never escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let p = Path::new(path);
        if p.is_absolute()
            || p.components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(Error::invalid_path(format!(
                "'{path}' must be relative without '..'"
            )));
        }
        Ok(self.base.join(p))
    }
}

impl StorageRead for FileStore {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(path)
            } else {
                Error::io(format!("failed to read {}: {e}", full.display()))
            }
        })
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.exists())
    }
}

impl StorageWrite for FileStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::io(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(&full, bytes)
            .map_err(|e| Error::io(format!("failed to write {}: {e}", full.display())))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!(
                "failed to delete {}: {e}",
                full.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.put("a/b", b"hello").unwrap();
        assert_eq!(store.get("a/b").unwrap(), b"hello");
        assert!(store.exists("a/b").unwrap());
        assert!(!store.exists("a/c").unwrap());
    }

    #[test]
    fn test_memory_store_not_found() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_store_delete_idempotent() {
        let store = MemoryStore::new();
        store.put("x", b"1").unwrap();
        store.delete("x").unwrap();
        store.delete("x").unwrap();
        assert!(!store.exists("x").unwrap());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("nested/chunk", b"data").unwrap();
        assert_eq!(store.get("nested/chunk").unwrap(), b"data");
        assert!(store.get("other").unwrap_err().is_not_found());
    }

    #[test]
    fn test_file_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("../escape").is_err());
        assert!(store.put("/abs", b"x").is_err());
    }

    #[test]
    fn test_sha256_hex() {
        let h = sha256_hex(b"");
        assert_eq!(
            h,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
