//! Tests for the in-memory index
//!
//! These tests verify:
//! - Rebuild applies frames in write order ("later frame wins")
//! - Tombstones leave absent markers that look like missing keys
//! - Dead bytes are charged during rebuild
//! - Compaction relocation only moves entries that were not rewritten

use std::path::Path;

use serde_json::json;
use tablekv::codec::{Frame, Key};
use tablekv::config::SyncStrategy;
use tablekv::index::{Index, Location, Slot};
use tablekv::segment::SegmentStore;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(dir: &Path) -> SegmentStore {
    SegmentStore::open(dir, 1024 * 1024, SyncStrategy::EveryWrite).unwrap()
}

fn write(store: &SegmentStore, id: i64, sequence: u64, name: &str) -> Location {
    let record = json!({"id": id, "name": name});
    let bytes = Frame::write(Key::Int(id), sequence, record.as_object().unwrap().clone())
        .encode()
        .unwrap();
    let (segment_id, offset) = store.append(&bytes).unwrap();
    Location {
        segment_id,
        offset,
        len: bytes.len() as u32,
        sequence,
    }
}

fn tombstone(store: &SegmentStore, id: i64, sequence: u64) -> u64 {
    let bytes = Frame::tombstone(Key::Int(id), sequence).encode().unwrap();
    store.append(&bytes).unwrap();
    bytes.len() as u64
}

fn location(segment_id: u64, offset: u64, sequence: u64) -> Location {
    Location {
        segment_id,
        offset,
        len: 10,
        sequence,
    }
}

// =============================================================================
// Rebuild Tests
// =============================================================================

#[test]
fn test_rebuild_empty_store() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let rebuilt = Index::rebuild(&store).unwrap();

    assert!(rebuilt.index.is_empty());
    assert_eq!(rebuilt.last_sequence, 0);
    assert_eq!(rebuilt.frames, 0);
}

#[test]
fn test_rebuild_later_frame_wins() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let first = write(&store, 1, 1, "John");
    let _other = write(&store, 2, 2, "Ann");
    let second = write(&store, 1, 3, "Jane");

    let rebuilt = Index::rebuild(&store).unwrap();

    assert_eq!(rebuilt.index.lookup(&Key::Int(1)), Some(second));
    assert_ne!(rebuilt.index.lookup(&Key::Int(1)), Some(first));
    assert_eq!(rebuilt.index.len(), 2);
    assert_eq!(rebuilt.last_sequence, 3);
    assert_eq!(rebuilt.frames, 3);

    // The superseded frame is dead
    assert_eq!(store.total_usage().dead_bytes, u64::from(first.len));
}

#[test]
fn test_rebuild_tombstone_hides_key() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let written = write(&store, 1, 1, "John");
    let tomb_len = tombstone(&store, 1, 2);

    let rebuilt = Index::rebuild(&store).unwrap();
    let index = rebuilt.index;

    assert_eq!(index.lookup(&Key::Int(1)), None);
    assert!(!index.contains(&Key::Int(1)));
    assert!(index.is_empty());
    assert!(index.keys().is_empty());
    assert_eq!(
        index.slot(&Key::Int(1)),
        Some(Slot::Absent {
            segment_id: 1,
            sequence: 2
        })
    );

    // Both the record and its tombstone are reclaimable
    assert_eq!(
        store.total_usage().dead_bytes,
        u64::from(written.len) + tomb_len
    );
}

#[test]
fn test_rebuild_reinsert_after_delete() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    write(&store, 1, 1, "John");
    tombstone(&store, 1, 2);
    let again = write(&store, 1, 3, "Jane");

    let rebuilt = Index::rebuild(&store).unwrap();
    assert_eq!(rebuilt.index.lookup(&Key::Int(1)), Some(again));
    assert_eq!(rebuilt.index.len(), 1);
}

#[test]
fn test_rebuild_keys_are_ordered() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    for (seq, id) in [5, 3, 9, 1].into_iter().enumerate() {
        write(&store, id, seq as u64 + 1, "x");
    }

    let rebuilt = Index::rebuild(&store).unwrap();
    assert_eq!(
        rebuilt.index.keys(),
        vec![Key::Int(1), Key::Int(3), Key::Int(5), Key::Int(9)]
    );
}

// =============================================================================
// In-Memory Update Tests
// =============================================================================

#[test]
fn test_put_and_mark_deleted_track_len() {
    let index = Index::new();

    assert_eq!(index.put(Key::Int(1), location(1, 0, 1)), None);
    assert_eq!(index.len(), 1);

    // Overwrite keeps the count
    let previous = index.put(Key::Int(1), location(1, 10, 2));
    assert_eq!(previous, Some(Slot::Present(location(1, 0, 1))));
    assert_eq!(index.len(), 1);

    let previous = index.mark_deleted(Key::Int(1), 1, 3);
    assert_eq!(previous, Some(Slot::Present(location(1, 10, 2))));
    assert_eq!(index.len(), 0);
    assert!(!index.contains(&Key::Int(1)));

    // Reinsert after an absent marker counts again
    index.put(Key::Int(1), location(1, 20, 4));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_references() {
    let index = Index::new();
    index.put(Key::Int(1), location(1, 0, 1));
    index.put(Key::Int(2), location(2, 0, 2));
    index.mark_deleted(Key::Int(3), 3, 3);

    assert!(index.references(1));
    assert!(index.references(2));
    // Absent markers do not pin a segment
    assert!(!index.references(3));
}

// =============================================================================
// Relocation Tests
// =============================================================================

#[test]
fn test_relocate_moves_matching_entries() {
    let index = Index::new();
    index.put(Key::Int(1), location(1, 0, 1));
    index.put(Key::Int(2), location(2, 0, 2));

    let moves = vec![
        (Key::Int(1), location(5, 0, 1)),
        (Key::Int(2), location(5, 10, 2)),
    ];
    let moved = index.relocate(&moves, &[1, 2]);

    assert_eq!(moved, 2);
    assert_eq!(index.lookup(&Key::Int(1)), Some(location(5, 0, 1)));
    assert_eq!(index.lookup(&Key::Int(2)), Some(location(5, 10, 2)));
    assert!(!index.references(1));
    assert!(!index.references(2));
}

#[test]
fn test_relocate_skips_rewritten_keys() {
    let index = Index::new();
    index.put(Key::Int(1), location(1, 0, 1));
    // Key 1 rewritten after the copy was taken
    index.put(Key::Int(1), location(3, 0, 7));

    let moved = index.relocate(&[(Key::Int(1), location(5, 0, 1))], &[1]);

    assert_eq!(moved, 0);
    assert_eq!(index.lookup(&Key::Int(1)), Some(location(3, 0, 7)));
}

#[test]
fn test_relocate_drops_absent_markers_of_removed_segments() {
    let index = Index::new();
    index.mark_deleted(Key::Int(1), 1, 1);
    index.mark_deleted(Key::Int(2), 4, 2);

    index.relocate(&[], &[1]);

    assert_eq!(index.slot(&Key::Int(1)), None);
    assert!(index.slot(&Key::Int(2)).is_some());
}
