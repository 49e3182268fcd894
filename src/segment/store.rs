//! Segment Store
//!
//! Owns the segment files of one table and coordinates appends and reads.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::{Decoded, Frame};
use crate::config::SyncStrategy;
use crate::error::{Result, StoreError};

use super::{
    compacting_path, is_compaction_leftover, parse_segment_id, segment_path, sync_dir, Segment,
};

/// Byte accounting over a set of segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentUsage {
    pub segments: usize,
    pub total_bytes: u64,
    pub dead_bytes: u64,
}

impl SegmentUsage {
    /// Fraction of bytes that compaction would reclaim
    pub fn dead_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// The one segment currently accepting appends
struct ActiveSegment {
    segment: Arc<Segment>,
    writer: File,
    /// End of the last fully written frame
    offset: u64,
    unsynced: usize,
}

/// Manages the segment files of a table
///
/// ## Concurrency:
/// - `segments`: RwLock (readers resolve ids, writer registers new segments)
/// - `active`: Mutex, only touched by the table's single writer
/// - Reads go through `Segment::read_at` and never take the active lock
pub struct SegmentStore {
    /// Directory holding the segment files (changes when the table is renamed)
    dir: RwLock<PathBuf>,

    max_segment_size: u64,
    sync_strategy: SyncStrategy,

    /// Every live segment, ordered by id
    segments: RwLock<BTreeMap<u64, Arc<Segment>>>,

    active: Mutex<ActiveSegment>,
    active_id: AtomicU64,
    next_id: AtomicU64,

    /// Set when a failed append could not be rolled back
    damaged: AtomicBool,
}

impl SegmentStore {
    /// Open or create the segment store in `dir`
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove unfinished compaction output
    /// 3. Discover segment files and order them by id
    /// 4. Open the highest id for appending (creating segment 1 if none exist)
    pub fn open(dir: &Path, max_segment_size: u64, sync_strategy: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if is_compaction_leftover(&path) {
                tracing::info!("Removing unfinished compaction output {}", path.display());
                fs::remove_file(&path)?;
                continue;
            }

            if let Some(id) = parse_segment_id(&path) {
                ids.push(id);
            }
        }

        // Directory listing order is arbitrary; ids define write order
        ids.sort_unstable();

        let mut segments = BTreeMap::new();
        for &id in &ids {
            let segment = Segment::open(&segment_path(dir, id), id)?;
            segments.insert(id, Arc::new(segment));
        }

        let (active_segment, writer) = match ids.last() {
            Some(&id) => {
                let writer = OpenOptions::new()
                    .append(true)
                    .open(segment_path(dir, id))?;
                (Arc::clone(&segments[&id]), writer)
            }
            None => {
                let (segment, writer) = create_segment(dir, 1)?;
                segments.insert(1, Arc::clone(&segment));
                (segment, writer)
            }
        };

        let active_id = active_segment.id();
        let offset = active_segment.len();

        Ok(Self {
            dir: RwLock::new(dir.to_path_buf()),
            max_segment_size,
            sync_strategy,
            segments: RwLock::new(segments),
            active: Mutex::new(ActiveSegment {
                segment: active_segment,
                writer,
                offset,
                unsynced: 0,
            }),
            active_id: AtomicU64::new(active_id),
            next_id: AtomicU64::new(active_id + 1),
            damaged: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append one encoded frame, returning (segment id, offset)
    ///
    /// Seals the active segment first if the frame would push it past the
    /// size threshold. The new length is published only after the write
    /// (and sync, if due) succeeded; on failure the partial bytes are cut off.
    pub fn append(&self, frame: &[u8]) -> Result<(u64, u64)> {
        let mut active = self.active.lock();
        let len = frame.len() as u64;

        if active.offset > 0 && active.offset + len > self.max_segment_size {
            self.rotate(&mut active)?;
        }

        let offset = active.offset;
        if let Err(e) = write_frame(&mut active, frame, self.sync_strategy) {
            self.roll_back(&mut active, offset);
            return Err(e.into());
        }

        active.offset = offset + len;
        active.segment.set_len(active.offset);

        Ok((active.segment.id(), offset))
    }

    /// fsync the active segment
    pub fn sync(&self) -> Result<()> {
        let mut active = self.active.lock();
        active.writer.sync_data()?;
        active.unsynced = 0;
        Ok(())
    }

    /// Seal the active segment and start a new one
    fn rotate(&self, active: &mut ActiveSegment) -> Result<()> {
        active.writer.sync_all()?;

        let sealed_id = active.segment.id();
        let sealed_len = active.offset;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let dir = self.dir();

        let (segment, writer) = create_segment(&dir, id)?;
        self.segments.write().insert(id, Arc::clone(&segment));
        self.active_id.store(id, Ordering::SeqCst);
        *active = ActiveSegment {
            segment,
            writer,
            offset: 0,
            unsynced: 0,
        };

        tracing::debug!(
            "Sealed segment {} at {} bytes, opened segment {}",
            sealed_id,
            sealed_len,
            id
        );
        Ok(())
    }

    fn roll_back(&self, active: &mut ActiveSegment, offset: u64) {
        if let Err(e) = active.writer.set_len(offset) {
            tracing::error!(
                "Could not truncate segment {} back to {} after a failed append: {}",
                active.segment.id(),
                offset,
                e
            );
            self.damaged.store(true, Ordering::SeqCst);
        }
    }

    /// True if a failed append left bytes the store could not remove
    pub fn needs_rebuild(&self) -> bool {
        self.damaged.load(Ordering::SeqCst)
    }

    /// Prepare for a fresh replay of every segment
    ///
    /// Dead-byte counters are zeroed (replay recomputes them) and the active
    /// segment's length is re-read from disk so bytes left behind by a failed
    /// append are seen, and trimmed, by the replay.
    pub fn reset_for_rebuild(&self) -> Result<()> {
        let mut active = self.active.lock();
        let on_disk = active.writer.metadata()?.len();
        active.offset = on_disk;
        active.segment.set_len(on_disk);

        for segment in self.segments.read().values() {
            segment.reset_dead();
        }

        self.damaged.store(false, Ordering::SeqCst);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read `len` bytes at `offset` of a segment
    pub fn read(&self, segment_id: u64, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.segment(segment_id)?.read_at(offset, len)
    }

    /// Resolve a segment id
    pub fn segment(&self, segment_id: u64) -> Result<Arc<Segment>> {
        self.segments
            .read()
            .get(&segment_id)
            .cloned()
            .ok_or(StoreError::SegmentNotFound(segment_id))
    }

    /// All segments, keyed by id
    pub fn snapshot(&self) -> BTreeMap<u64, Arc<Segment>> {
        self.segments.read().clone()
    }

    /// Ids of every segment except the active one, ascending
    pub fn list_sealed_segments(&self) -> Vec<u64> {
        let active_id = self.active_id();
        self.segments
            .read()
            .keys()
            .copied()
            .filter(|&id| id != active_id)
            .collect()
    }

    pub fn active_id(&self) -> u64 {
        self.active_id.load(Ordering::SeqCst)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Replay every frame in (segment id, offset) order
    ///
    /// A torn tail on the active segment (a final frame that is cut short,
    /// fails its checksum, or is followed only by zero bytes) is truncated
    /// away. The same damage anywhere else is `CorruptFrame`.
    pub fn replay<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Segment, u64, u32, Frame) -> Result<()>,
    {
        let active_id = self.active_id();

        for (id, segment) in self.snapshot() {
            let data = segment.read_all()?;
            let mut offset = 0usize;

            while offset < data.len() {
                let rest = &data[offset..];
                let damage = match Frame::decode_prefix(rest) {
                    Ok(Decoded::Complete { frame, len }) => {
                        visit(segment.as_ref(), offset as u64, len as u32, frame)?;
                        offset += len;
                        continue;
                    }
                    Ok(Decoded::Incomplete) => "incomplete frame".to_string(),
                    Ok(Decoded::ChecksumMismatch { len }) if len == rest.len() => {
                        "checksum mismatch in the final frame".to_string()
                    }
                    Ok(Decoded::ChecksumMismatch { .. }) => {
                        return Err(StoreError::CorruptFrame(format!(
                            "checksum mismatch in segment {} at offset {}",
                            id, offset
                        )))
                    }
                    Err(StoreError::CorruptFrame(msg)) => {
                        if !rest.iter().all(|&b| b == 0) {
                            return Err(StoreError::CorruptFrame(format!(
                                "segment {} at offset {}: {}",
                                id, offset, msg
                            )));
                        }
                        "zero-filled tail".to_string()
                    }
                    Err(e) => return Err(e),
                };

                if id != active_id {
                    return Err(StoreError::CorruptFrame(format!(
                        "sealed segment {} has a {} at offset {}",
                        id, damage, offset
                    )));
                }

                tracing::warn!(
                    "Segment {}: {} at offset {}, discarding {} trailing bytes",
                    id,
                    damage,
                    offset,
                    rest.len()
                );
                self.truncate_active(offset as u64)?;
                break;
            }
        }

        Ok(())
    }

    fn truncate_active(&self, len: u64) -> Result<()> {
        let mut active = self.active.lock();
        active.writer.set_len(len)?;
        active.writer.sync_all()?;
        active.offset = len;
        active.segment.set_len(len);
        Ok(())
    }

    // =========================================================================
    // Space Accounting
    // =========================================================================

    /// Charge `bytes` of dead frames to a segment
    pub fn mark_dead(&self, segment_id: u64, bytes: u64) {
        if let Some(segment) = self.segments.read().get(&segment_id) {
            segment.add_dead(bytes);
        }
    }

    /// Usage of the sealed segments (what compaction can reclaim)
    pub fn sealed_usage(&self) -> SegmentUsage {
        let active_id = self.active_id();
        self.usage(|id| id != active_id)
    }

    /// Usage of every segment, active included
    pub fn total_usage(&self) -> SegmentUsage {
        self.usage(|_| true)
    }

    fn usage(&self, include: impl Fn(u64) -> bool) -> SegmentUsage {
        let segments = self.segments.read();
        segments
            .values()
            .filter(|s| include(s.id()))
            .fold(SegmentUsage::default(), |mut usage, s| {
                usage.segments += 1;
                usage.total_bytes += s.len();
                usage.dead_bytes += s.dead_bytes();
                usage
            })
    }

    // =========================================================================
    // Compaction Support
    // =========================================================================

    /// Retire the active segment and reserve an id for compaction output
    ///
    /// The active segment is sealed (or removed, if empty) and a new active
    /// segment takes the id after the reserved one, so the compacted
    /// segment replays after every segment it replaces and before any
    /// later write.
    pub fn reserve_compaction_slot(&self) -> Result<u64> {
        let mut active = self.active.lock();
        let dir = self.dir();

        let retired = active.segment.id();
        let retire_empty = active.offset == 0;
        if !retire_empty {
            active.writer.sync_all()?;
        }

        let reserved = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (segment, writer) = create_segment(&dir, id)?;
        {
            let mut segments = self.segments.write();
            segments.insert(id, Arc::clone(&segment));
            if retire_empty {
                segments.remove(&retired);
            }
        }
        self.active_id.store(id, Ordering::SeqCst);
        *active = ActiveSegment {
            segment,
            writer,
            offset: 0,
            unsynced: 0,
        };

        if retire_empty {
            fs::remove_file(segment_path(&dir, retired))?;
        }

        Ok(reserved)
    }

    /// Create (or recreate) the temporary file compaction writes into
    pub fn create_compaction_file(&self, id: u64) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(compacting_path(&self.dir(), id))?;
        Ok(file)
    }

    /// Publish a finished compaction file as segment `id`
    pub fn install_compacted(&self, id: u64) -> Result<Arc<Segment>> {
        let dir = self.dir();
        let target = segment_path(&dir, id);
        fs::rename(compacting_path(&dir, id), &target)?;
        sync_dir(&dir)?;

        let segment = Arc::new(Segment::open(&target, id)?);
        self.segments.write().insert(id, Arc::clone(&segment));
        Ok(segment)
    }

    /// Throw away an unfinished compaction file
    pub fn discard_compaction_file(&self, id: u64) {
        let path = compacting_path(&self.dir(), id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }

    /// Remove a sealed segment's file
    ///
    /// Callers must have moved every index entry off this segment first.
    pub fn delete_segment(&self, segment_id: u64) -> Result<()> {
        if segment_id == self.active_id() {
            return Err(StoreError::InvalidArgument(format!(
                "segment {} is the active segment",
                segment_id
            )));
        }
        if !self.segments.read().contains_key(&segment_id) {
            return Err(StoreError::SegmentNotFound(segment_id));
        }

        fs::remove_file(segment_path(&self.dir(), segment_id))?;
        self.segments.write().remove(&segment_id);
        Ok(())
    }

    // =========================================================================
    // Location
    // =========================================================================

    pub fn dir(&self) -> PathBuf {
        self.dir.read().clone()
    }

    /// Point the store at its directory's new location after a rename
    pub fn relocate(&self, dir: PathBuf) {
        *self.dir.write() = dir;
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("dir", &self.dir())
            .field("active_id", &self.active_id())
            .field("segments", &self.segment_count())
            .finish_non_exhaustive()
    }
}

/// Create a new, empty segment file and its read handle
fn create_segment(dir: &Path, id: u64) -> Result<(Arc<Segment>, File)> {
    let path = segment_path(dir, id);
    let writer = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&path)?;
    sync_dir(dir)?;
    let segment = Segment::open(&path, id)?;
    Ok((Arc::new(segment), writer))
}

fn write_frame(active: &mut ActiveSegment, frame: &[u8], strategy: SyncStrategy) -> io::Result<()> {
    active.writer.write_all(frame)?;

    match strategy {
        SyncStrategy::EveryWrite => active.writer.sync_data()?,
        SyncStrategy::EveryNEntries { count } => {
            active.unsynced += 1;
            if active.unsynced >= count.max(1) {
                active.writer.sync_data()?;
                active.unsynced = 0;
            }
        }
    }

    Ok(())
}
