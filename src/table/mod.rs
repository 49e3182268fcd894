//! Table Module
//!
//! The table engine: one key-value table backed by a segment store and an
//! in-memory index.
//!
//! ## Responsibilities
//! - Insert/get/update/delete/scan with typed errors
//! - Assign sequence numbers in write order
//! - Write-ahead discipline: segment append first, index update second
//! - Trigger compaction when sealed segments are mostly dead
//! - Refuse work after an index/segment inconsistency until rebuilt

mod meta;
mod scan;

pub use meta::{TableMeta, TableOptions, FORMAT_VERSION};
pub use scan::Scan;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;

use crate::codec::{Frame, Key, KeyType, Record};
use crate::compaction::{CompactionStats, Compactor};
use crate::config::Config;
use crate::error::{Entity, Result, StoreError};
use crate::index::{present_entries, Index, Location, Slot};
use crate::segment::{Segment, SegmentStore};

const READY: u8 = 0;
const UNUSABLE: u8 = 1;
const DROPPED: u8 = 2;

/// Point-in-time numbers about a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub live_keys: usize,
    pub segments: usize,
    pub total_bytes: u64,
    pub dead_bytes: u64,
    pub next_sequence: u64,
}

/// A key-value table
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (insert/update/delete/compact): Serialized by `write_lock`
///   - Held for exactly one logical operation, acquired with a timeout
///   - Order inside the lock: sequence → segment append → index update
///
/// - **Reads** (get/scan): Never touch `write_lock`
///   - Resolve the key under the index read lock, then read the frame
///     with a positional read; published frames are immutable
pub struct Table {
    /// Current table name (changes on rename)
    name: RwLock<String>,

    meta: TableMeta,

    store: SegmentStore,
    index: Index,

    /// Serializes write operations
    write_lock: Mutex<()>,

    /// Sequence number for the next write
    next_sequence: AtomicU64,

    state: AtomicU8,

    lock_timeout: Option<Duration>,
    auto_compact: bool,
    compaction_dead_ratio: f64,
}

impl Table {
    /// Create a new, empty table in `dir`
    pub fn create(dir: &Path, name: &str, options: &TableOptions, config: &Config) -> Result<Self> {
        if options.key_field.is_empty() {
            return Err(StoreError::InvalidArgument(
                "key field name must not be empty".to_string(),
            ));
        }
        if dir.exists() {
            return Err(StoreError::already_exists(Entity::Table, name));
        }

        std::fs::create_dir_all(dir)?;
        TableMeta::from_options(options).store(dir)?;

        Self::open(dir, name, config)
    }

    /// Open an existing table, rebuilding its index from the segments
    pub fn open(dir: &Path, name: &str, config: &Config) -> Result<Self> {
        if !dir.is_dir() || !dir.join(meta::META_FILE).is_file() {
            return Err(StoreError::not_found(Entity::Table, name));
        }

        let meta = TableMeta::load(dir)?;
        let store = SegmentStore::open(dir, config.max_segment_size, config.sync_strategy)?;
        let rebuilt = Index::rebuild(&store)?;

        tracing::info!(
            "Opened table '{}': {} segments, {} frames, {} live keys, next sequence {}",
            name,
            store.segment_count(),
            rebuilt.frames,
            rebuilt.index.len(),
            rebuilt.last_sequence + 1
        );

        Ok(Self {
            name: RwLock::new(name.to_string()),
            meta,
            store,
            index: rebuilt.index,
            write_lock: Mutex::new(()),
            next_sequence: AtomicU64::new(rebuilt.last_sequence + 1),
            state: AtomicU8::new(READY),
            lock_timeout: config.lock_timeout,
            auto_compact: config.auto_compact,
            compaction_dead_ratio: config.compaction_dead_ratio,
        })
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Insert a record under a key that is not present
    pub fn insert(&self, key: &Key, record: Record) -> Result<()> {
        let record = self.prepare(key, record)?;
        let _write_guard = self.lock_writes()?;
        self.ensure_usable()?;

        if self.index.contains(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::write(key.clone(), sequence, record).encode()?;
        let (segment_id, offset) = self.append(&frame)?;

        let previous = self.index.put(
            key.clone(),
            Location {
                segment_id,
                offset,
                len: frame.len() as u32,
                sequence,
            },
        );
        self.retire(previous);

        self.maybe_compact();
        Ok(())
    }

    /// Fetch the current record for a key
    pub fn get(&self, key: &Key) -> Result<Record> {
        self.ensure_usable()?;
        self.check_key(key)?;
        let result = self.read_record(key);
        self.track(result)
    }

    /// Replace the record of a present key
    pub fn update(&self, key: &Key, record: Record) -> Result<()> {
        let record = self.prepare(key, record)?;
        let _write_guard = self.lock_writes()?;
        self.ensure_usable()?;

        if !self.index.contains(key) {
            return Err(StoreError::not_found(Entity::Record, key.to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::write(key.clone(), sequence, record).encode()?;
        let (segment_id, offset) = self.append(&frame)?;

        let previous = self.index.put(
            key.clone(),
            Location {
                segment_id,
                offset,
                len: frame.len() as u32,
                sequence,
            },
        );
        self.retire(previous);

        self.maybe_compact();
        Ok(())
    }

    /// Delete a present key by writing a tombstone
    pub fn delete(&self, key: &Key) -> Result<()> {
        self.check_key(key)?;
        let _write_guard = self.lock_writes()?;
        self.ensure_usable()?;

        if !self.index.contains(key) {
            return Err(StoreError::not_found(Entity::Record, key.to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::tombstone(key.clone(), sequence).encode()?;
        let (segment_id, _) = self.append(&frame)?;

        // A tombstone is dead weight from the moment it lands
        self.store.mark_dead(segment_id, frame.len() as u64);
        let previous = self.index.mark_deleted(key.clone(), segment_id, sequence);
        self.retire(previous);

        self.maybe_compact();
        Ok(())
    }

    /// Snapshot scan over all present records, in key order
    pub fn scan(&self) -> Result<Scan<'_>> {
        self.ensure_usable()?;

        // Pin the segments while the index is locked so every captured
        // location resolves even if compaction runs mid-scan
        let (entries, segments) = {
            let index = self.index.read();
            (present_entries(&index), self.store.snapshot())
        };

        Ok(Scan::new(self, entries, segments))
    }

    /// Every present key, in key order
    pub fn keys(&self) -> Result<Vec<Key>> {
        self.ensure_usable()?;
        Ok(self.index.keys())
    }

    pub fn contains(&self, key: &Key) -> Result<bool> {
        self.ensure_usable()?;
        self.check_key(key)?;
        Ok(self.index.contains(key))
    }

    /// Number of present keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Compact sealed segments now, regardless of the dead ratio
    pub fn compact(&self) -> Result<CompactionStats> {
        let _write_guard = self.lock_writes()?;
        self.ensure_usable()?;
        self.compact_locked()
    }

    /// Rebuild the index from the segment files
    ///
    /// This is the recovery path for a table marked unusable.
    pub fn rebuild(&self) -> Result<()> {
        let _write_guard = self.lock_writes()?;
        if self.state.load(Ordering::SeqCst) == DROPPED {
            return Err(StoreError::not_found(Entity::Table, self.name()));
        }

        self.store.reset_for_rebuild()?;
        let rebuilt = Index::rebuild(&self.store)?;
        let live = rebuilt.index.len();
        self.index.replace_with(rebuilt.index);
        self.next_sequence
            .store(rebuilt.last_sequence + 1, Ordering::SeqCst);
        self.state.store(READY, Ordering::SeqCst);

        tracing::info!(
            "Rebuilt table '{}': {} frames, {} live keys",
            self.name(),
            rebuilt.frames,
            live
        );
        Ok(())
    }

    /// fsync the active segment
    pub fn sync(&self) -> Result<()> {
        self.ensure_usable()?;
        self.store.sync()
    }

    pub fn stats(&self) -> TableStats {
        let usage = self.store.total_usage();
        TableStats {
            live_keys: self.index.len(),
            segments: usage.segments,
            total_bytes: usage.total_bytes,
            dead_bytes: usage.dead_bytes,
            next_sequence: self.next_sequence.load(Ordering::SeqCst),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn key_type(&self) -> KeyType {
        self.meta.key_type
    }

    pub fn key_field(&self) -> &str {
        &self.meta.key_field
    }

    /// Directory holding this table's files
    pub fn dir(&self) -> PathBuf {
        self.store.dir()
    }

    /// Ids of the sealed segments, ascending
    pub fn sealed_segments(&self) -> Vec<u64> {
        self.store.list_sealed_segments()
    }

    /// False once the table has hit a fatal inconsistency
    pub fn is_usable(&self) -> bool {
        self.state.load(Ordering::SeqCst) == READY
    }

    // =========================================================================
    // Catalog Hooks
    // =========================================================================

    /// Acquire the write lock so the catalog can move or remove the directory
    pub(crate) fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        match self.lock_timeout {
            Some(timeout) => self
                .write_lock
                .try_lock_for(timeout)
                .ok_or(StoreError::LockTimeout(timeout)),
            None => Ok(self.write_lock.lock()),
        }
    }

    /// Re-register under a new directory/name (caller holds the write lock)
    pub(crate) fn relocate(&self, _write_guard: &MutexGuard<'_, ()>, dir: PathBuf, name: &str) {
        self.store.relocate(dir);
        *self.name.write() = name.to_string();
    }

    /// The directory is gone; fail every later call (caller holds the write lock)
    pub(crate) fn mark_dropped(&self, _write_guard: &MutexGuard<'_, ()>) {
        self.state.store(DROPPED, Ordering::SeqCst);
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn ensure_usable(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            READY => Ok(()),
            DROPPED => Err(StoreError::not_found(Entity::Table, self.name())),
            _ => Err(StoreError::TableUnusable(self.name())),
        }
    }

    /// Mark the table unusable if `result` is a fatal error
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.mark_unusable(e);
            }
        }
        result
    }

    fn mark_unusable(&self, cause: &StoreError) {
        let was = self
            .state
            .compare_exchange(READY, UNUSABLE, Ordering::SeqCst, Ordering::SeqCst);
        if was.is_ok() {
            tracing::error!(
                "Table '{}' marked unusable until rebuilt: {}",
                self.name(),
                cause
            );
        }
    }

    fn check_key(&self, key: &Key) -> Result<()> {
        if key.key_type() != self.meta.key_type {
            return Err(StoreError::KeyTypeMismatch {
                expected: self.meta.key_type,
                found: key.to_string(),
            });
        }
        Ok(())
    }

    /// Validate a record against its key, filling in a missing key field
    fn prepare(&self, key: &Key, mut record: Record) -> Result<Record> {
        self.check_key(key)?;

        let expected = key.to_json();
        match record.get(&self.meta.key_field) {
            None => {
                record.insert(self.meta.key_field.clone(), expected);
            }
            Some(found) if *found == expected => {}
            Some(found) => {
                return Err(StoreError::InvalidRecord(format!(
                    "field '{}' is {} but the key is {}",
                    self.meta.key_field,
                    render(found),
                    key
                )))
            }
        }

        Ok(record)
    }

    fn append(&self, frame: &[u8]) -> Result<(u64, u64)> {
        self.store.append(frame).map_err(|e| {
            if self.store.needs_rebuild() {
                self.mark_unusable(&e);
            }
            e
        })
    }

    /// Charge a superseded frame to its segment
    fn retire(&self, previous: Option<Slot>) {
        if let Some(Slot::Present(old)) = previous {
            self.store.mark_dead(old.segment_id, u64::from(old.len));
        }
    }

    fn read_record(&self, key: &Key) -> Result<Record> {
        let (location, segment) = {
            let index = self.index.read();
            match index.get(key) {
                Some(Slot::Present(location)) => {
                    (*location, self.store.segment(location.segment_id)?)
                }
                _ => return Err(StoreError::not_found(Entity::Record, key.to_string())),
            }
        };

        read_live_record(&segment, key, &location)
    }

    fn maybe_compact(&self) {
        if !self.auto_compact {
            return;
        }

        let usage = self.store.sealed_usage();
        if usage.dead_bytes == 0 || usage.dead_ratio() <= self.compaction_dead_ratio {
            return;
        }

        tracing::debug!(
            "Table '{}': sealed segments are {:.0}% dead, compacting",
            self.name(),
            usage.dead_ratio() * 100.0
        );
        if let Err(e) = self.compact_locked() {
            tracing::warn!("Automatic compaction of '{}' failed: {}", self.name(), e);
        }
    }

    fn compact_locked(&self) -> Result<CompactionStats> {
        let result = Compactor::new(&self.store, &self.index).run();
        self.track(result)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == DROPPED {
            return;
        }
        if let Err(e) = self.store.sync() {
            tracing::warn!("Failed to sync table '{}' on close: {}", self.name(), e);
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("meta", &self.meta)
            .field("live_keys", &self.index.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Read the frame at `location` and check it is the record the index expects
pub(crate) fn read_live_record(segment: &Segment, key: &Key, location: &Location) -> Result<Record> {
    let bytes = segment.read_at(location.offset, location.len)?;
    let frame = Frame::decode(&bytes)?;

    if frame.key != *key || frame.sequence != location.sequence {
        return Err(StoreError::CorruptFrame(format!(
            "index entry for {} points at frame for {} (sequence {}, expected {})",
            key, frame.key, frame.sequence, location.sequence
        )));
    }

    frame.value.ok_or_else(|| {
        StoreError::CorruptFrame(format!(
            "index entry for {} points at a tombstone",
            key
        ))
    })
}

fn render(value: &Value) -> String {
    value.to_string()
}
