//! Hashed unique index inside a mapped segment
//!
//! ## Segment Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (72 bytes)                                           │
//! │   Magic "MAPKVIDX" (8) | Version u32 (4) | GeometryCRC (4)  │
//! │   Seed u64 | Buckets u64 | SegmentLen u64                   │
//! │   Items u64 | HeapTop u64 | DeadBytes u64 | HashCheck u64   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Bucket Table (Buckets × u64 entry offsets, 0 = empty)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Entry Heap (bump-allocated, 8-byte aligned)                 │
//! │   [Next u64][Hash u64][KeyLen u32][ValLen u32][ValCap u32]  │
//! │   [Pad u32][Key][Value + slack up to ValCap]                │
//! │   ... repeated ...                                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Free space (HeapTop .. SegmentLen)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Offsets are absolute within the file, so
//! the index is position independent across mappings and processes.
//!
//! Entry hashes are persisted, so the header also stores the hash of a fixed
//! key under the file's seed. A build whose hasher disagrees refuses the file.
//!
//! Deleted and relocated entries become dead bytes. When the heap runs out,
//! the index is rebuilt in place: live entries are copied out, the segment
//! grows by doubling if compaction alone is not enough, and everything is
//! rewritten. Rebuilding also happens when the load factor passes 3/4.

use std::hash::BuildHasher;
use std::path::Path;

use foldhash::fast::FixedState;

use super::Segment;
use crate::error::{MapKvError, Result};
use crate::protocol::ErrorCode;

// =============================================================================
// Layout Constants
// =============================================================================

const MAGIC: &[u8; 8] = b"MAPKVIDX";
const VERSION: u32 = 2;
const HEADER_SIZE: u64 = 72;

const OFF_VERSION: u64 = 8;
const OFF_CRC: u64 = 12;
const OFF_SEED: u64 = 16;
const OFF_BUCKETS: u64 = 24;
const OFF_SEGMENT_LEN: u64 = 32;
const OFF_ITEMS: u64 = 40;
const OFF_HEAP_TOP: u64 = 48;
const OFF_DEAD: u64 = 56;
const OFF_HASH_CHECK: u64 = 64;

const ENTRY_HEADER_SIZE: u64 = 32;
const ENTRY_HASH: u64 = 8;
const ENTRY_KEY_LEN: u64 = 16;
const ENTRY_VAL_LEN: u64 = 20;
const ENTRY_VAL_CAP: u64 = 24;
const ENTRY_PAD: u64 = 28;

const INITIAL_BUCKETS: u64 = 64;
const DEFAULT_SEED: u64 = 0x6d61_706b_7600_0001;
const HASH_CHECK_KEY: &[u8] = b"mapkv-hash-check";

fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Hash of [`HASH_CHECK_KEY`] under `seed` with the hasher this build uses
fn hash_check(seed: u64) -> u64 {
    FixedState::with_seed(seed).hash_one(HASH_CHECK_KEY)
}

fn entry_size(key_len: usize, value_len: usize) -> u64 {
    align8(ENTRY_HEADER_SIZE + key_len as u64 + value_len as u64)
}

/// A decoded entry header
#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    next: u64,
    hash: u64,
    key_len: u32,
    val_len: u32,
    val_cap: u32,
}

impl Entry {
    fn key_offset(&self) -> u64 {
        self.offset + ENTRY_HEADER_SIZE
    }

    fn value_offset(&self) -> u64 {
        self.key_offset() + self.key_len as u64
    }

    fn size(&self) -> u64 {
        ENTRY_HEADER_SIZE + self.key_len as u64 + self.val_cap as u64
    }
}

/// Hashed unique index of key → value items stored in a [`Segment`]
///
/// Not synchronized; [`Storage`](super::Storage) serializes access.
#[derive(Debug)]
pub struct HashIndex {
    segment: Segment,
    /// Ceiling for segment growth
    max_len: u64,
}

impl HashIndex {
    /// Open the index in `path`, formatting a fresh one-page segment if the
    /// file is new.
    pub fn open(path: &Path, max_len: u64) -> Result<Self> {
        let page = super::page_size() as u64;
        let (segment, created) = Segment::open_or_create(path, page)?;
        let mut index = Self { segment, max_len };

        if created {
            let len = index.segment.len();
            index.format(INITIAL_BUCKETS, DEFAULT_SEED, len)?;
            tracing::info!("Created storage segment {} ({} bytes)", path.display(), len);
        } else {
            index.validate()?;
            tracing::info!(
                "Opened storage segment {} ({} bytes, {} items)",
                path.display(),
                index.capacity(),
                index.len()
            );
        }

        Ok(index)
    }

    // =========================================================================
    // Header Accessors
    // =========================================================================

    fn seed(&self) -> u64 {
        self.segment.read_u64(OFF_SEED)
    }

    fn buckets(&self) -> u64 {
        self.segment.read_u64(OFF_BUCKETS)
    }

    /// Usable segment length recorded in the header
    pub fn capacity(&self) -> u64 {
        self.segment.read_u64(OFF_SEGMENT_LEN)
    }

    /// Number of items currently indexed
    pub fn len(&self) -> usize {
        self.segment.read_u64(OFF_ITEMS) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by deleted or relocated entries
    pub fn dead_bytes(&self) -> u64 {
        self.segment.read_u64(OFF_DEAD)
    }

    fn heap_top(&self) -> u64 {
        self.segment.read_u64(OFF_HEAP_TOP)
    }

    fn heap_start(&self) -> u64 {
        self.buckets().saturating_mul(8).saturating_add(HEADER_SIZE)
    }

    fn set_items(&mut self, items: usize) {
        self.segment.write_u64(OFF_ITEMS, items as u64);
    }

    fn geometry_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.segment.slice(0, OFF_CRC as usize));
        hasher.update(self.segment.slice(OFF_SEED, (OFF_ITEMS - OFF_SEED) as usize));
        hasher.update(self.segment.slice(OFF_HASH_CHECK, 8));
        hasher.finalize()
    }

    // =========================================================================
    // Formatting / Validation
    // =========================================================================

    /// Write an empty index over the first `segment_len` bytes
    fn format(&mut self, buckets: u64, seed: u64, segment_len: u64) -> Result<()> {
        let heap_start = HEADER_SIZE + buckets * 8;
        if heap_start > segment_len || segment_len > self.segment.len() {
            return Err(MapKvError::SegmentExhausted {
                requested: heap_start,
                limit: segment_len.min(self.segment.len()),
            });
        }

        self.segment.bytes_mut()[..heap_start as usize].fill(0);
        self.segment.write_slice(0, MAGIC);
        self.segment.write_u32(OFF_VERSION, VERSION);
        self.segment.write_u64(OFF_SEED, seed);
        self.segment.write_u64(OFF_BUCKETS, buckets);
        self.segment.write_u64(OFF_SEGMENT_LEN, segment_len);
        self.segment.write_u64(OFF_ITEMS, 0);
        self.segment.write_u64(OFF_HEAP_TOP, heap_start);
        self.segment.write_u64(OFF_DEAD, 0);
        self.segment.write_u64(OFF_HASH_CHECK, hash_check(seed));
        let crc = self.geometry_crc();
        self.segment.write_u32(OFF_CRC, crc);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.segment.len() < HEADER_SIZE {
            return Err(MapKvError::Corrupted(format!(
                "file is {} bytes, shorter than the header",
                self.segment.len()
            )));
        }
        if self.segment.slice(0, MAGIC.len()) != MAGIC {
            return Err(MapKvError::Corrupted("bad magic".into()));
        }
        let version = self.segment.read_u32(OFF_VERSION);
        if version != VERSION {
            return Err(MapKvError::Corrupted(format!(
                "unsupported version {}",
                version
            )));
        }
        if self.segment.read_u32(OFF_CRC) != self.geometry_crc() {
            return Err(MapKvError::Corrupted("header checksum mismatch".into()));
        }
        if self.segment.read_u64(OFF_HASH_CHECK) != hash_check(self.seed()) {
            return Err(MapKvError::Corrupted(
                "file was written with a different hash function".into(),
            ));
        }
        self.check_bounds()
    }

    fn check_bounds(&self) -> Result<()> {
        let buckets = self.buckets();
        let capacity = self.capacity();
        let heap_top = self.heap_top();

        if buckets == 0 {
            return Err(MapKvError::Corrupted("zero buckets".into()));
        }
        if capacity > self.segment.len() {
            return Err(MapKvError::Corrupted(format!(
                "header records {} bytes but only {} are mapped",
                capacity,
                self.segment.len()
            )));
        }
        if heap_top < self.heap_start() || heap_top > capacity {
            return Err(MapKvError::Corrupted(format!(
                "heap top {} outside [{}, {}]",
                heap_top,
                self.heap_start(),
                capacity
            )));
        }
        Ok(())
    }

    /// Remap if another process grew the segment since we last looked.
    ///
    /// Must be called with the cross-process lock held, before any access.
    pub fn sync(&mut self) -> Result<()> {
        if self.capacity() > self.segment.len() {
            self.segment.remap()?;
        }
        self.check_bounds()
    }

    // =========================================================================
    // Entry Access
    // =========================================================================

    fn hash(&self, key: &[u8]) -> u64 {
        FixedState::with_seed(self.seed()).hash_one(key)
    }

    fn bucket_slot(&self, hash: u64) -> u64 {
        HEADER_SIZE + (hash % self.buckets()) * 8
    }

    fn entry_at(&self, offset: u64) -> Result<Entry> {
        let heap_top = self.heap_top();
        let header_end = offset.checked_add(ENTRY_HEADER_SIZE);
        if offset < self.heap_start() || offset % 8 != 0 || header_end.map_or(true, |end| end > heap_top) {
            return Err(MapKvError::Corrupted(format!(
                "entry offset {} out of heap",
                offset
            )));
        }

        let entry = Entry {
            offset,
            next: self.segment.read_u64(offset),
            hash: self.segment.read_u64(offset + ENTRY_HASH),
            key_len: self.segment.read_u32(offset + ENTRY_KEY_LEN),
            val_len: self.segment.read_u32(offset + ENTRY_VAL_LEN),
            val_cap: self.segment.read_u32(offset + ENTRY_VAL_CAP),
        };

        if entry.val_len > entry.val_cap || offset + entry.size() > heap_top {
            return Err(MapKvError::Corrupted(format!(
                "entry at {} overruns the heap",
                offset
            )));
        }
        Ok(entry)
    }

    fn key_of(&self, entry: &Entry) -> &[u8] {
        self.segment.slice(entry.key_offset(), entry.key_len as usize)
    }

    fn value_of(&self, entry: &Entry) -> &[u8] {
        self.segment.slice(entry.value_offset(), entry.val_len as usize)
    }

    /// Locate `key`; returns the offset of the link pointing at the entry
    /// (bucket slot or predecessor's `next`) together with the entry.
    fn find(&self, hash: u64, key: &[u8]) -> Result<Option<(u64, Entry)>> {
        let mut link = self.bucket_slot(hash);
        let mut current = self.segment.read_u64(link);
        let mut hops = 0usize;

        while current != 0 {
            let entry = self.entry_at(current)?;
            if entry.hash == hash && self.key_of(&entry) == key {
                return Ok(Some((link, entry)));
            }

            hops += 1;
            if hops > self.len() {
                return Err(MapKvError::Corrupted("cycle in bucket chain".into()));
            }
            link = current;
            current = entry.next;
        }
        Ok(None)
    }

    fn unlink(&mut self, link: u64, entry: &Entry) {
        self.segment.write_u64(link, entry.next);
        let dead = self.dead_bytes() + entry.size();
        self.segment.write_u64(OFF_DEAD, dead);
    }

    /// Bump-allocate and link a new entry at the head of its bucket.
    /// Space must already be reserved.
    fn push_front(&mut self, hash: u64, key: &[u8], value: &[u8]) {
        let size = entry_size(key.len(), value.len());
        let offset = self.heap_top();
        let slot = self.bucket_slot(hash);
        let head = self.segment.read_u64(slot);
        let val_cap = size - ENTRY_HEADER_SIZE - key.len() as u64;

        self.segment.write_u64(offset, head);
        self.segment.write_u64(offset + ENTRY_HASH, hash);
        self.segment.write_u32(offset + ENTRY_KEY_LEN, key.len() as u32);
        self.segment.write_u32(offset + ENTRY_VAL_LEN, value.len() as u32);
        self.segment.write_u32(offset + ENTRY_VAL_CAP, val_cap as u32);
        self.segment.write_u32(offset + ENTRY_PAD, 0);
        self.segment.write_slice(offset + ENTRY_HEADER_SIZE, key);
        self.segment
            .write_slice(offset + ENTRY_HEADER_SIZE + key.len() as u64, value);

        self.segment.write_u64(slot, offset);
        self.segment.write_u64(OFF_HEAP_TOP, offset + size);
    }

    // =========================================================================
    // Space Management
    // =========================================================================

    /// Make room for `size` more heap bytes, rebuilding if necessary
    fn reserve(&mut self, size: u64) -> Result<()> {
        if self.heap_top() + size <= self.capacity() {
            return Ok(());
        }
        self.rebuild(self.buckets(), size)
    }

    /// Copy out every live item as (hash, key, value)
    fn collect(&self) -> Result<Vec<(u64, Vec<u8>, Vec<u8>)>> {
        let mut items = Vec::with_capacity(self.len());
        for bucket in 0..self.buckets() {
            let mut current = self.segment.read_u64(HEADER_SIZE + bucket * 8);
            while current != 0 {
                let entry = self.entry_at(current)?;
                items.push((
                    entry.hash,
                    self.key_of(&entry).to_vec(),
                    self.value_of(&entry).to_vec(),
                ));
                if items.len() > self.len() {
                    return Err(MapKvError::Corrupted(
                        "more entries reachable than recorded".into(),
                    ));
                }
                current = entry.next;
            }
        }
        Ok(items)
    }

    /// Rewrite the index with `buckets` buckets and at least `extra` free heap
    /// bytes, growing the segment by doubling when compaction is not enough.
    fn rebuild(&mut self, buckets: u64, extra: u64) -> Result<()> {
        let live = self.collect()?;
        let payload: u64 = live
            .iter()
            .map(|(_, key, value)| entry_size(key.len(), value.len()))
            .sum();
        let needed = HEADER_SIZE + buckets * 8 + payload + extra;

        let mut new_len = self.capacity();
        let target = needed + needed / 4;
        while new_len < target {
            new_len = new_len.saturating_mul(2);
        }

        let limit = self.max_len.max(self.capacity());
        if new_len > limit {
            if needed > limit {
                return Err(MapKvError::SegmentExhausted {
                    requested: needed,
                    limit,
                });
            }
            new_len = limit;
        }

        if new_len > self.segment.len() {
            self.segment.grow(new_len)?;
        }

        let seed = self.seed();
        self.format(buckets, seed, new_len)?;
        for (hash, key, value) in &live {
            self.push_front(*hash, key, value);
        }
        self.set_items(live.len());

        tracing::debug!(
            "Rebuilt index: {} items, {} buckets, {} of {} bytes used",
            live.len(),
            buckets,
            self.heap_top(),
            new_len
        );
        Ok(())
    }

    /// Double the bucket table once the load factor passes 3/4.
    /// Running out of room here is not an error: chains just get longer.
    fn maybe_rehash(&mut self) -> Result<()> {
        let buckets = self.buckets();
        if (self.len() as u64) * 4 <= buckets * 3 {
            return Ok(());
        }
        match self.rebuild(buckets * 2, 0) {
            Err(MapKvError::SegmentExhausted { .. }) => {
                tracing::debug!("Skipping rehash, segment at its ceiling");
                Ok(())
            }
            other => other,
        }
    }

    fn check_value_len(value: &[u8]) -> Result<()> {
        if value.len() > u32::MAX as usize {
            return Err(MapKvError::SegmentExhausted {
                requested: value.len() as u64,
                limit: u32::MAX as u64,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<ErrorCode> {
        Self::check_value_len(value)?;
        let hash = self.hash(key);
        if self.find(hash, key)?.is_some() {
            return Ok(ErrorCode::InsertKeyAlreadyExists);
        }

        self.reserve(entry_size(key.len(), value.len()))?;
        self.push_front(hash, key, value);
        self.set_items(self.len() + 1);
        self.maybe_rehash()?;
        Ok(ErrorCode::None)
    }

    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<ErrorCode> {
        Self::check_value_len(value)?;
        let hash = self.hash(key);
        let Some((_, entry)) = self.find(hash, key)? else {
            return Ok(ErrorCode::UpdateKeyNotFound);
        };
        if self.value_of(&entry) == value {
            return Ok(ErrorCode::UpdateValueAlreadyExists);
        }

        // Fits in the existing slot: overwrite in place
        if value.len() <= entry.val_cap as usize {
            self.segment.write_slice(entry.value_offset(), value);
            self.segment
                .write_u32(entry.offset + ENTRY_VAL_LEN, value.len() as u32);
            return Ok(ErrorCode::None);
        }

        // Relocate; a rebuild during reserve moves every entry, so look again
        self.reserve(entry_size(key.len(), value.len()))?;
        let (link, entry) = self.find(hash, key)?.ok_or_else(|| {
            MapKvError::Corrupted("key vanished while reserving space".into())
        })?;
        self.unlink(link, &entry);
        self.push_front(hash, key, value);
        Ok(ErrorCode::None)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<ErrorCode> {
        let hash = self.hash(key);
        let Some((link, entry)) = self.find(hash, key)? else {
            return Ok(ErrorCode::DeleteKeyNotFound);
        };
        self.unlink(link, &entry);
        self.set_items(self.len() - 1);
        Ok(ErrorCode::None)
    }

    pub fn get(&self, key: &[u8]) -> Result<(ErrorCode, Vec<u8>)> {
        let hash = self.hash(key);
        match self.find(hash, key)? {
            Some((_, entry)) => Ok((ErrorCode::None, self.value_of(&entry).to_vec())),
            None => Ok((ErrorCode::GetKeyNotFound, Vec::new())),
        }
    }

    /// msync the segment
    pub fn flush(&self) -> Result<()> {
        self.segment.flush()
    }

    pub fn path(&self) -> &Path {
        self.segment.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIMIT: u64 = 64 * 1024 * 1024;

    fn open_temp() -> (TempDir, HashIndex) {
        let dir = TempDir::new().unwrap();
        let index = HashIndex::open(&dir.path().join("index.bin"), LIMIT).unwrap();
        (dir, index)
    }

    #[test]
    fn test_fresh_index_is_one_page() {
        let (_dir, index) = open_temp();
        assert_eq!(index.capacity(), crate::storage::page_size() as u64);
        assert!(index.is_empty());
    }

    #[test]
    fn test_update_in_place_and_relocated() {
        let (_dir, mut index) = open_temp();
        index.insert(b"k", b"12345678").unwrap();

        // Shorter value reuses the slot
        assert_eq!(index.update(b"k", b"abc").unwrap(), ErrorCode::None);
        assert_eq!(index.dead_bytes(), 0);
        assert_eq!(index.get(b"k").unwrap(), (ErrorCode::None, b"abc".to_vec()));

        // Longer value relocates and leaves dead bytes behind
        let long = vec![b'x'; 200];
        assert_eq!(index.update(b"k", &long).unwrap(), ErrorCode::None);
        assert!(index.dead_bytes() > 0);
        assert_eq!(index.get(b"k").unwrap(), (ErrorCode::None, long));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_grows_past_first_page() {
        let (_dir, mut index) = open_temp();
        let initial = index.capacity();

        for i in 0..2000u32 {
            let key = format!("key-{}", i);
            let value = format!("value-{}", i);
            assert_eq!(
                index.insert(key.as_bytes(), value.as_bytes()).unwrap(),
                ErrorCode::None
            );
        }

        assert!(index.capacity() > initial);
        assert_eq!(index.len(), 2000);
        for i in (0..2000u32).step_by(97) {
            let key = format!("key-{}", i);
            assert_eq!(
                index.get(key.as_bytes()).unwrap(),
                (ErrorCode::None, format!("value-{}", i).into_bytes())
            );
        }
    }

    #[test]
    fn test_compaction_reclaims_dead_space() {
        let (_dir, mut index) = open_temp();
        let capacity = index.capacity();
        let value = vec![7u8; 256];

        // Churn far more bytes than one page through insert/delete
        for round in 0..100 {
            let key = format!("churn-{}", round % 3);
            index.insert(key.as_bytes(), &value).unwrap();
            assert_eq!(index.delete(key.as_bytes()).unwrap(), ErrorCode::None);
        }

        assert_eq!(index.capacity(), capacity);
        assert!(index.is_empty());
    }

    #[test]
    fn test_ceiling_is_fatal() {
        let dir = TempDir::new().unwrap();
        let page = crate::storage::page_size() as u64;
        let mut index = HashIndex::open(&dir.path().join("small.bin"), page).unwrap();

        let big = vec![1u8; page as usize];
        assert!(matches!(
            index.insert(b"big", &big),
            Err(MapKvError::SegmentExhausted { .. })
        ));
        assert_eq!(index.get(b"big").unwrap().0, ErrorCode::GetKeyNotFound);
    }

    #[test]
    fn test_reopen_validates_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        {
            let mut index = HashIndex::open(&path, LIMIT).unwrap();
            index.insert(b"a", b"1").unwrap();
        }

        // Flip a byte inside the checksummed geometry
        {
            let (mut segment, _) = Segment::open_or_create(&path, 0).unwrap();
            let buckets = segment.read_u64(OFF_BUCKETS);
            segment.write_u64(OFF_BUCKETS, buckets + 1);
        }

        assert!(matches!(
            HashIndex::open(&path, LIMIT),
            Err(MapKvError::Corrupted(_))
        ));
    }

    #[test]
    fn test_hasher_change_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        {
            let mut index = HashIndex::open(&path, LIMIT).unwrap();
            index.insert(b"a", b"1").unwrap();

            // As if written by a build whose hasher differs, checksum intact
            let foreign = hash_check(index.seed()) ^ 1;
            index.segment.write_u64(OFF_HASH_CHECK, foreign);
            let crc = index.geometry_crc();
            index.segment.write_u32(OFF_CRC, crc);
        }

        match HashIndex::open(&path, LIMIT) {
            Err(MapKvError::Corrupted(msg)) => assert!(msg.contains("hash function")),
            other => panic!("expected Corrupted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_foreign_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        assert!(matches!(
            HashIndex::open(&path, LIMIT),
            Err(MapKvError::Corrupted(_))
        ));
    }
}
