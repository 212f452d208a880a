//! Storage Module
//!
//! Persistent storage living in a memory-mapped file.
//!
//! ## Responsibilities
//! - Map the storage file and keep the mapping in sync with other processes
//! - Maintain a hashed, unique-key index inside the mapping
//! - Serialize every index access behind one cross-process lock
//!
//! ## Layering
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Storage (engine.rs)                    │
//! │   in-process Mutex + ProcessLock       │
//! ├────────────────────────────────────────┤
//! │ HashIndex (index.rs)                   │
//! │   header | buckets | entry heap        │
//! ├────────────────────────────────────────┤
//! │ Segment (segment.rs)                   │
//! │   file + memmap2::MmapMut              │
//! └────────────────────────────────────────┘
//! ```

mod engine;
mod index;
mod lock;
mod segment;

pub use engine::Storage;
pub use index::HashIndex;
pub use lock::{LocalLock, NamedLock, ProcessLock};
pub use segment::Segment;

use crate::error::Result;
use crate::protocol::ErrorCode;

/// Platform memory page size (4096 when the platform will not say)
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Key-value operations the network layer dispatches to.
///
/// The outer `Result` carries fatal failures (I/O, corruption, exhausted
/// capacity); the `ErrorCode` carries the business outcome.
pub trait Store: Send + Sync {
    /// Insert a new item; `InsertKeyAlreadyExists` if the key is present
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<ErrorCode>;

    /// Overwrite an existing item's value
    fn update(&self, key: &[u8], value: &[u8]) -> Result<ErrorCode>;

    /// Remove an item
    fn delete(&self, key: &[u8]) -> Result<ErrorCode>;

    /// Copy out an item's value (empty unless the code is `None`)
    fn get(&self, key: &[u8]) -> Result<(ErrorCode, Vec<u8>)>;

    /// Number of items currently indexed
    fn size(&self) -> Result<usize>;

    /// Push pending changes to the backing file
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
