//! Table scans
//!
//! A scan captures the index and the segment list at call time and reads
//! records lazily. Writes made after the scan started are not visible to
//! it; call `Table::scan` again for a fresh snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::vec;

use crate::codec::{Key, Record};
use crate::error::{Result, StoreError};
use crate::index::Location;
use crate::segment::Segment;

use super::{read_live_record, Table};

/// Lazy iterator over (key, record) in key order
pub struct Scan<'a> {
    table: &'a Table,
    entries: vec::IntoIter<(Key, Location)>,
    /// Segments pinned for the lifetime of the scan
    segments: BTreeMap<u64, Arc<Segment>>,
}

impl<'a> Scan<'a> {
    pub(super) fn new(
        table: &'a Table,
        entries: Vec<(Key, Location)>,
        segments: BTreeMap<u64, Arc<Segment>>,
    ) -> Self {
        Self {
            table,
            entries: entries.into_iter(),
            segments,
        }
    }

    /// Records not yet yielded
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    fn load(&self, key: &Key, location: &Location) -> Result<Record> {
        let segment = self
            .segments
            .get(&location.segment_id)
            .ok_or(StoreError::SegmentNotFound(location.segment_id))?;
        read_live_record(segment, key, location)
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<(Key, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, location) = self.entries.next()?;
        let result = self.load(&key, &location).map(|record| (key, record));
        Some(self.table.track(result))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
