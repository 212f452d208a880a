//! Storage Engine
//!
//! Thread-safe and process-safe front of the [`HashIndex`].
//!
//! ## Responsibilities
//! - Two-phase lifecycle: construct with a lock, then `init` with a path
//! - Take the in-process mutex, then the cross-process lock, for every call
//! - Pick up segment growth made by other processes before each access
//!
//! ## Concurrency Model
//!
//! Every operation (reads included) is serialized:
//!
//! ```text
//!   thread ──► parking_lot::Mutex ──► ProcessLock ──► HashIndex::sync ──► op
//!                                                                        │
//!   thread ◄── unlock mutex ◄──────── unlock process lock ◄──────────────┘
//! ```
//!
//! Reads also take the exclusive lock: another process may be rebuilding
//! the segment under our mapping at any time.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};

use super::{HashIndex, LocalLock, NamedLock, ProcessLock, Store};
use crate::config::Config;
use crate::error::{MapKvError, Result};
use crate::protocol::ErrorCode;

/// Default segment ceiling when `init` is called without one
const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024 * 1024;

/// Persistent storage of unique key → value items
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct Storage {
    /// Exclusion across processes mapping the same file
    lock: Box<dyn ProcessLock>,

    /// Exclusion across threads of this process; `None` until `init`
    index: Mutex<Option<HashIndex>>,
}

/// Both locks held; released in reverse order on drop
struct Exclusive<'a> {
    guard: MutexGuard<'a, Option<HashIndex>>,
    lock: &'a dyn ProcessLock,
}

impl<'a> Exclusive<'a> {
    fn index(&mut self) -> Result<&mut HashIndex> {
        let index = self.guard.as_mut().ok_or(MapKvError::NotInitialized)?;
        index.sync()?;
        Ok(index)
    }
}

impl Drop for Exclusive<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            tracing::error!("Failed to release process lock '{}': {}", self.lock.name(), e);
        }
    }
}

impl Deref for Exclusive<'_> {
    type Target = Option<HashIndex>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for Exclusive<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Storage {
    /// Create uninitialized storage guarded by `lock`
    pub fn new(lock: Box<dyn ProcessLock>) -> Self {
        Self {
            lock,
            index: Mutex::new(None),
        }
    }

    /// Create uninitialized storage guarded by the named OS lock `name`
    pub fn with_named_lock(name: &str) -> Result<Self> {
        Ok(Self::new(Box::new(NamedLock::open_or_create(name)?)))
    }

    /// Create uninitialized storage for single-process use
    pub fn local() -> Self {
        Self::new(Box::new(LocalLock::new("local")))
    }

    /// Open and initialize storage as described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Self::with_named_lock(&config.lock_name)?;
        storage.init_with_limit(&config.storage_path, config.max_segment_bytes)?;
        Ok(storage)
    }

    /// Map the storage file at `path`, creating it if needed
    pub fn init(&self, path: impl AsRef<Path>) -> Result<()> {
        self.init_with_limit(path, DEFAULT_MAX_SEGMENT_BYTES)
    }

    /// Like [`init`](Self::init) with an explicit segment ceiling.
    ///
    /// Calling it again replaces the mapping with the one at `path`.
    pub fn init_with_limit(&self, path: impl AsRef<Path>, max_segment_bytes: u64) -> Result<()> {
        let path = path.as_ref();
        let mut exclusive = self.exclusive()?;
        let index = HashIndex::open(path, max_segment_bytes)?;
        tracing::debug!(
            "Storage initialized at {} under lock '{}'",
            path.display(),
            self.lock.name()
        );
        *exclusive = Some(index);
        Ok(())
    }

    /// Whether `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.index.lock().is_some()
    }

    /// Path of the mapped file, once initialized
    pub fn path(&self) -> Option<PathBuf> {
        self.index
            .lock()
            .as_ref()
            .map(|index| index.path().to_path_buf())
    }

    /// Current usable segment size in bytes
    pub fn capacity(&self) -> Result<u64> {
        let mut exclusive = self.exclusive()?;
        Ok(exclusive.index()?.capacity())
    }

    fn exclusive(&self) -> Result<Exclusive<'_>> {
        let guard = self.index.lock();
        self.lock.lock()?;
        Ok(Exclusive {
            guard,
            lock: self.lock.as_ref(),
        })
    }
}

impl Store for Storage {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<ErrorCode> {
        let mut exclusive = self.exclusive()?;
        exclusive.index()?.insert(key, value)
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<ErrorCode> {
        let mut exclusive = self.exclusive()?;
        exclusive.index()?.update(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<ErrorCode> {
        let mut exclusive = self.exclusive()?;
        exclusive.index()?.delete(key)
    }

    fn get(&self, key: &[u8]) -> Result<(ErrorCode, Vec<u8>)> {
        let mut exclusive = self.exclusive()?;
        exclusive.index()?.get(key)
    }

    fn size(&self) -> Result<usize> {
        let mut exclusive = self.exclusive()?;
        Ok(exclusive.index()?.len())
    }

    fn flush(&self) -> Result<()> {
        let mut exclusive = self.exclusive()?;
        exclusive.index()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_calls_fail() {
        let storage = Storage::local();
        assert!(!storage.is_initialized());
        assert!(matches!(storage.get(b"k"), Err(MapKvError::NotInitialized)));
        assert!(matches!(storage.size(), Err(MapKvError::NotInitialized)));
    }

    #[test]
    fn test_init_then_use() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::local();
        storage.init(dir.path().join("s.bin")).unwrap();

        assert!(storage.is_initialized());
        assert_eq!(storage.insert(b"a", b"1").unwrap(), ErrorCode::None);
        assert_eq!(storage.size().unwrap(), 1);
        assert_eq!(storage.path().unwrap(), dir.path().join("s.bin"));
    }
}
