//! Index Module
//!
//! In-memory map from key to the location of its newest frame.
//!
//! ## Responsibilities
//! - Point lookups in O(log n)
//! - Rebuild from segments on open (segments are the only source of truth)
//! - Remember deletions as explicit absent markers
//! - Ordered iteration for scans and compaction
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys, so scans come back sorted
//! - Each update swaps one small `Slot` under a short write lock, so a
//!   reader sees either the old or the new location, never a mix

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::codec::Key;
use crate::error::Result;
use crate::segment::SegmentStore;

/// Where a frame lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub segment_id: u64,
    pub offset: u64,
    /// Encoded frame length
    pub len: u32,
    pub sequence: u64,
}

/// Index entry for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The newest frame is a record write
    Present(Location),

    /// The newest frame is a tombstone
    Absent { segment_id: u64, sequence: u64 },
}

impl Slot {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Slot::Present(location) => Some(location),
            Slot::Absent { .. } => None,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Slot::Present(location) => location.sequence,
            Slot::Absent { sequence, .. } => *sequence,
        }
    }
}

/// Result of replaying a table's segments
#[derive(Debug)]
pub struct Rebuilt {
    pub index: Index,
    /// Highest sequence number found in any frame (0 if none)
    pub last_sequence: u64,
    pub frames: u64,
}

/// In-memory key index of one table
#[derive(Debug, Default)]
pub struct Index {
    entries: RwLock<BTreeMap<Key, Slot>>,
    /// Number of `Present` slots
    live: AtomicUsize,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay every frame of `store` in write order
    ///
    /// Later frames overwrite earlier ones unconditionally. Superseded
    /// frames and tombstones are charged to their segments as dead bytes.
    pub fn rebuild(store: &SegmentStore) -> Result<Rebuilt> {
        let mut entries = BTreeMap::new();
        let mut live = 0usize;
        let mut last_sequence = 0u64;
        let mut frames = 0u64;

        store.replay(|segment, offset, len, frame| {
            frames += 1;
            last_sequence = last_sequence.max(frame.sequence);

            let slot = if frame.is_tombstone() {
                segment.add_dead(u64::from(len));
                Slot::Absent {
                    segment_id: segment.id(),
                    sequence: frame.sequence,
                }
            } else {
                live += 1;
                Slot::Present(Location {
                    segment_id: segment.id(),
                    offset,
                    len,
                    sequence: frame.sequence,
                })
            };

            if let Some(Slot::Present(old)) = entries.insert(frame.key, slot) {
                live -= 1;
                store.mark_dead(old.segment_id, u64::from(old.len));
            }
            Ok(())
        })?;

        Ok(Rebuilt {
            index: Index {
                entries: RwLock::new(entries),
                live: AtomicUsize::new(live),
            },
            last_sequence,
            frames,
        })
    }

    /// Swap in the contents of a freshly rebuilt index
    pub fn replace_with(&self, other: Index) {
        let mut entries = self.entries.write();
        *entries = other.entries.into_inner();
        self.live
            .store(other.live.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Location of the key's current record, if present
    pub fn lookup(&self, key: &Key) -> Option<Location> {
        self.entries.read().get(key).and_then(|s| s.location().copied())
    }

    /// Raw slot, including absent markers
    pub fn slot(&self, key: &Key) -> Option<Slot> {
        self.entries.read().get(key).copied()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.lookup(key).is_some()
    }

    /// Every present key, in key order
    pub fn keys(&self) -> Vec<Key> {
        self.entries
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Present(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every present (key, location), in key order
    pub fn entries(&self) -> Vec<(Key, Location)> {
        present_entries(&self.entries.read())
    }

    /// Number of present keys
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any present entry points into `segment_id`
    pub fn references(&self, segment_id: u64) -> bool {
        self.entries
            .read()
            .values()
            .any(|slot| matches!(slot, Slot::Present(l) if l.segment_id == segment_id))
    }

    /// Key and sequence of the newest absent marker held in `segments`
    pub fn newest_absent(&self, segments: &BTreeSet<u64>) -> Option<(Key, u64)> {
        self.entries
            .read()
            .iter()
            .filter(|(_, slot)| {
                matches!(slot, Slot::Absent { segment_id, .. } if segments.contains(segment_id))
            })
            .max_by_key(|(_, slot)| slot.sequence())
            .map(|(key, slot)| (key.clone(), slot.sequence()))
    }

    /// Hold the read lock while resolving locations against segments
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Key, Slot>> {
        self.entries.read()
    }

    // =========================================================================
    // Updates (only after the frame is durable in a segment)
    // =========================================================================

    /// Point `key` at a new record frame, returning the previous slot
    pub fn put(&self, key: Key, location: Location) -> Option<Slot> {
        let previous = self.entries.write().insert(key, Slot::Present(location));
        if !matches!(previous, Some(Slot::Present(_))) {
            self.live.fetch_add(1, Ordering::SeqCst);
        }
        previous
    }

    /// Record a tombstone for `key`, returning the previous slot
    pub fn mark_deleted(&self, key: Key, segment_id: u64, sequence: u64) -> Option<Slot> {
        let previous = self.entries.write().insert(
            key,
            Slot::Absent {
                segment_id,
                sequence,
            },
        );
        if matches!(previous, Some(Slot::Present(_))) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        previous
    }

    /// Apply compaction results in one step
    ///
    /// Each move is applied only if the key still points at the frame that
    /// was copied (same sequence). Absent markers whose tombstone lived in a
    /// removed segment are dropped, matching what a rebuild would produce.
    pub fn relocate(&self, moves: &[(Key, Location)], removed_segments: &[u64]) -> usize {
        let removed: BTreeSet<u64> = removed_segments.iter().copied().collect();
        let mut entries = self.entries.write();

        let mut moved = 0usize;
        for (key, new_location) in moves {
            if let Some(Slot::Present(current)) = entries.get_mut(key) {
                if current.sequence == new_location.sequence {
                    *current = *new_location;
                    moved += 1;
                }
            }
        }

        entries.retain(|_, slot| match slot {
            Slot::Absent { segment_id, .. } => !removed.contains(segment_id),
            Slot::Present(_) => true,
        });

        moved
    }
}

/// Present (key, location) pairs of an already-locked map
pub(crate) fn present_entries(entries: &BTreeMap<Key, Slot>) -> Vec<(Key, Location)> {
    entries
        .iter()
        .filter_map(|(key, slot)| slot.location().map(|l| (key.clone(), *l)))
        .collect()
}
