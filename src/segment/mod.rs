//! Segment Store Module
//!
//! Append-only segment files holding frames.
//!
//! ## Responsibilities
//! - Discover segments on startup, ordered by numeric id
//! - Append whole frames to the single active segment
//! - Seal the active segment once it reaches the size threshold
//! - Positional reads for index lookups (no shared file cursor)
//! - Replay every frame in write order, trimming a torn tail
//! - Track dead bytes per segment for the compaction trigger
//!
//! ## Directory Layout
//! ```text
//! {table_dir}/
//!   ├── table.meta
//!   ├── segment-0000000001.log     (sealed)
//!   ├── segment-0000000002.log     (sealed)
//!   ├── segment-0000000003.log     (active, highest id)
//!   └── segment-0000000004.compacting  (only while compaction runs)
//! ```

mod file;
mod store;

pub use file::Segment;
pub use store::{SegmentStore, SegmentUsage};

use std::path::{Path, PathBuf};

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".log";
const COMPACTING_SUFFIX: &str = ".compacting";

/// Path of the segment file with the given id
pub(crate) fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:010}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX))
}

/// Path compaction writes to before the output is installed
pub(crate) fn compacting_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:010}{}", SEGMENT_PREFIX, id, COMPACTING_SUFFIX))
}

/// Parse a segment id from a file name
/// "segment-0000000042.log" → Some(42)
pub(crate) fn parse_segment_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_compaction_leftover(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(SEGMENT_PREFIX) && n.ends_with(COMPACTING_SUFFIX))
        .unwrap_or(false)
}

/// fsync a directory so renames and unlinks inside it are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
