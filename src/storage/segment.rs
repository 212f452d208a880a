//! Mapped file segment
//!
//! A file exposed as addressable memory via `memmap2`. The segment never
//! shrinks; growth extends the file and remaps it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{MapKvError, Result};

/// A read-write shared mapping of a whole file
pub struct Segment {
    path: PathBuf,
    file: File,
    /// SAFETY: mapped MAP_SHARED over `file`; every access from this process
    /// goes through `&self`/`&mut self` while the storage locks are held, and
    /// other processes only touch it under the same cross-process lock.
    mmap: MmapMut,
}

impl Segment {
    /// Open `path`, creating it with `initial_len` bytes when it is new or empty.
    ///
    /// Returns the segment and whether it was freshly created (zero-filled).
    pub fn open_or_create(path: &Path, initial_len: u64) -> Result<(Self, bool)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let created = file.metadata()?.len() == 0;
        if created {
            file.set_len(initial_len)?;
        }

        let mmap = Self::map(&file)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                mmap,
            },
            created,
        ))
    }

    fn map(file: &File) -> Result<MmapMut> {
        // SAFETY: the file is opened read-write and is only ever grown, so the
        // mapped range stays backed by the file for the mapping's lifetime.
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(mmap)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped length in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Extend the file to `new_len` bytes and remap it
    pub fn grow(&mut self, new_len: u64) -> Result<()> {
        if new_len < self.len() {
            return Err(MapKvError::Corrupted(format!(
                "refusing to shrink segment from {} to {} bytes",
                self.len(),
                new_len
            )));
        }
        self.mmap.flush()?;
        self.file.set_len(new_len)?;
        self.mmap = Self::map(&self.file)?;
        tracing::debug!("Grew segment {} to {} bytes", self.path.display(), new_len);
        Ok(())
    }

    /// Remap after another process changed the file length
    pub fn remap(&mut self) -> Result<()> {
        self.mmap = Self::map(&self.file)?;
        tracing::debug!(
            "Remapped segment {} at {} bytes",
            self.path.display(),
            self.mmap.len()
        );
        Ok(())
    }

    /// Synchronously write dirty pages back to the file
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    // =========================================================================
    // Scalar Accessors (little-endian; callers check bounds first)
    // =========================================================================

    pub fn read_u32(&self, offset: u64) -> u32 {
        let at = offset as usize;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.mmap[at..at + 4]);
        u32::from_le_bytes(raw)
    }

    pub fn read_u64(&self, offset: u64) -> u64 {
        let at = offset as usize;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.mmap[at..at + 8]);
        u64::from_le_bytes(raw)
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) {
        let at = offset as usize;
        self.mmap[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) {
        let at = offset as usize;
        self.mmap[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn slice(&self, offset: u64, len: usize) -> &[u8] {
        let at = offset as usize;
        &self.mmap[at..at + len]
    }

    pub fn write_slice(&mut self, offset: u64, bytes: &[u8]) {
        let at = offset as usize;
        self.mmap[at..at + bytes.len()].copy_from_slice(bytes);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = self.mmap.flush() {
            tracing::warn!("Failed to flush segment {}: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}
