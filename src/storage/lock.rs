//! Cross-process locking
//!
//! The storage mutex only excludes threads of the current process. A
//! [`ProcessLock`] extends that exclusion to every process mapping the same
//! file. `NamedLock` is the real one; `LocalLock` is for single-process use.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{MapKvError, Result};

/// Exclusion visible outside the current process.
///
/// Callers already hold the storage's in-process mutex when calling `lock`,
/// so implementations never see two concurrent callers from one process.
pub trait ProcessLock: Send + Sync + fmt::Debug {
    /// Block until the lock is held
    fn lock(&self) -> Result<()>;

    /// Release a lock taken by `lock`
    fn unlock(&self) -> Result<()>;

    /// Name the lock is addressed by
    fn name(&self) -> &str;
}

// =============================================================================
// NamedLock
// =============================================================================

/// An OS-level named lock: `flock(2)` on `<dir>/<name>.lock`.
///
/// Any process opening the same name in the same directory contends for it.
#[derive(Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
    file: File,
}

impl NamedLock {
    /// Open (creating if needed) the lock named `name` in the system temp dir
    pub fn open_or_create(name: &str) -> Result<Self> {
        Self::open_in(&std::env::temp_dir(), name)
    }

    /// Open (creating if needed) the lock named `name` in `dir`
    pub fn open_in(dir: &Path, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(MapKvError::Lock(format!("invalid lock name '{}'", name)));
        }

        let path = dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        tracing::debug!("Opened named lock '{}' at {}", name, path.display());

        Ok(Self {
            name: name.to_string(),
            path,
            file,
        })
    }

    /// Path of the backing lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flock(&self, operation: libc::c_int) -> Result<()> {
        loop {
            // SAFETY: the descriptor stays open for the lifetime of `self.file`.
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), operation) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(MapKvError::Lock(format!(
                    "flock on {} failed: {}",
                    self.path.display(),
                    err
                )));
            }
        }
    }
}

impl ProcessLock for NamedLock {
    fn lock(&self) -> Result<()> {
        self.flock(libc::LOCK_EX)
    }

    fn unlock(&self) -> Result<()> {
        self.flock(libc::LOCK_UN)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// LocalLock
// =============================================================================

/// Exclusion limited to the current process.
///
/// Adds nothing on top of the storage mutex; use it when no other process
/// maps the storage file (tests, embedded use).
#[derive(Debug, Default, Clone)]
pub struct LocalLock {
    name: String,
}

impl LocalLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProcessLock for LocalLock {
    fn lock(&self) -> Result<()> {
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
