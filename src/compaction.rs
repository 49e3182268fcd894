//! Compaction Module
//!
//! Rewrites the live records of a table's sealed segments into one new
//! segment and removes the old files.
//!
//! ## Protocol (caller holds the table's write lock)
//! ```text
//!   before:  [seg 1][seg 2][seg 3 (active)]
//!
//!   1. reserve:  seal seg 3, reserve id 4 for output, open seg 5 as active
//!   2. copy:     live frames of 1..=3 ──► segment-0000000004.compacting
//!   3. install:  fsync, rename to segment-0000000004.log
//!   4. swap:     index entries move to seg 4 in one step
//!   5. delete:   seg 1, seg 2, seg 3 (ascending, stop at first failure)
//!
//!   after:   [seg 4][seg 5 (active)]
//! ```
//!
//! Tombstones are dropped, except the newest one when no live record has
//! a higher sequence number.
//!
//! A crash at any point leaves a directory that replays to the same
//! records: leftover `.compacting` files are ignored on open, and the
//! output segment sorts after every segment it replaces.

use std::collections::BTreeSet;
use std::io::{BufWriter, Write};

use crate::codec::{Frame, Key};
use crate::error::{Result, StoreError};
use crate::index::{Index, Location};
use crate::segment::SegmentStore;

/// What a compaction run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sealed segments whose files were removed
    pub segments_removed: usize,
    pub records_copied: usize,
    /// Size of the sealed segments before compaction
    pub bytes_before: u64,
    /// Size of the compacted output
    pub bytes_after: u64,
}

impl CompactionStats {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Runs one compaction over a table's segments and index
pub struct Compactor<'a> {
    store: &'a SegmentStore,
    index: &'a Index,
}

impl<'a> Compactor<'a> {
    pub fn new(store: &'a SegmentStore, index: &'a Index) -> Self {
        Self { store, index }
    }

    /// Compact every sealed segment, sealing the active one first
    pub fn run(&self) -> Result<CompactionStats> {
        if self.store.total_usage().total_bytes == 0 {
            return Ok(CompactionStats::default());
        }

        let reserved = self.store.reserve_compaction_slot()?;
        let sealed: Vec<u64> = self
            .store
            .list_sealed_segments()
            .into_iter()
            .filter(|&id| id < reserved)
            .collect();
        let sealed_set: BTreeSet<u64> = sealed.iter().copied().collect();

        let bytes_before = sealed
            .iter()
            .map(|&id| self.store.segment(id).map(|s| s.len()))
            .sum::<Result<u64>>()?;

        let live: Vec<(Key, Location)> = self
            .index
            .entries()
            .into_iter()
            .filter(|(_, location)| sealed_set.contains(&location.segment_id))
            .collect();

        // The newest tombstone survives unless a live record is newer, so the
        // highest sequence number outlives a reopen
        let newest_live = live.iter().map(|(_, l)| l.sequence).max().unwrap_or(0);
        let kept = self
            .index
            .newest_absent(&sealed_set)
            .filter(|(_, sequence)| *sequence > newest_live);

        let (moves, kept_len) = match self.copy_live(reserved, &live, kept.as_ref()) {
            Ok(copied) => copied,
            Err(e) => {
                self.store.discard_compaction_file(reserved);
                return Err(e);
            }
        };

        let bytes_after = if moves.is_empty() && kept.is_none() {
            self.store.discard_compaction_file(reserved);
            0
        } else {
            self.store.install_compacted(reserved)?.len()
        };

        let moved = self.index.relocate(&moves, &sealed);
        debug_assert_eq!(moved, moves.len());

        if let Some((key, sequence)) = kept {
            self.index.mark_deleted(key, reserved, sequence);
            self.store.mark_dead(reserved, kept_len);
        }

        let segments_removed = self.delete_sealed(&sealed);

        let stats = CompactionStats {
            segments_removed,
            records_copied: moves.len(),
            bytes_before,
            bytes_after,
        };

        tracing::info!(
            "Compacted {} segments into segment {}: {} records, {} -> {} bytes",
            segments_removed,
            reserved,
            stats.records_copied,
            bytes_before,
            bytes_after
        );
        Ok(stats)
    }

    /// Copy live frames into the compaction file, returning their new locations
    ///
    /// `tombstone` is written after the live frames; its encoded length is
    /// returned alongside the moves (0 when there is none).
    fn copy_live(
        &self,
        target: u64,
        live: &[(Key, Location)],
        tombstone: Option<&(Key, u64)>,
    ) -> Result<(Vec<(Key, Location)>, u64)> {
        let file = self.store.create_compaction_file(target)?;
        let mut writer = BufWriter::new(file);
        let mut moves = Vec::with_capacity(live.len());
        let mut offset = 0u64;

        for (key, location) in live {
            let bytes = self
                .store
                .read(location.segment_id, location.offset, location.len)?;

            // Never carry a damaged or misplaced frame into the new segment
            let frame = Frame::decode(&bytes)?;
            if frame.key != *key || frame.sequence != location.sequence || frame.is_tombstone() {
                return Err(StoreError::CorruptFrame(format!(
                    "segment {} offset {} does not hold the live record for {}",
                    location.segment_id, location.offset, key
                )));
            }

            writer.write_all(&bytes)?;
            moves.push((
                key.clone(),
                Location {
                    segment_id: target,
                    offset,
                    len: location.len,
                    sequence: location.sequence,
                },
            ));
            offset += u64::from(location.len);
        }

        let mut tombstone_len = 0u64;
        if let Some((key, sequence)) = tombstone {
            let bytes = Frame::tombstone(key.clone(), *sequence).encode()?;
            writer.write_all(&bytes)?;
            tombstone_len = bytes.len() as u64;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((moves, tombstone_len))
    }

    /// Remove replaced segments oldest first
    ///
    /// Stopping at the first problem keeps the surviving segments a
    /// contiguous suffix, which always replays correctly.
    fn delete_sealed(&self, sealed: &[u64]) -> usize {
        let mut removed = 0;

        for &id in sealed {
            if self.index.references(id) {
                tracing::warn!("Segment {} is still referenced after compaction, keeping it", id);
                break;
            }
            if let Err(e) = self.store.delete_segment(id) {
                tracing::warn!("Failed to delete compacted segment {}: {}", id, e);
                break;
            }
            removed += 1;
        }

        removed
    }
}

impl std::fmt::Debug for Compactor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("store", self.store)
            .finish_non_exhaustive()
    }
}
