//! Segment handle
//!
//! One open segment file, read with positional I/O so concurrent readers
//! never share a file cursor.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};

/// An open segment file
///
/// `len` only ever covers fully written frames: the writer publishes the
/// new length after the bytes are in the file.
pub struct Segment {
    id: u64,
    file: File,
    len: AtomicU64,
    dead: AtomicU64,
}

impl Segment {
    /// Open an existing segment file for reading
    pub(crate) fn open(path: &Path, id: u64) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            id,
            file,
            len: AtomicU64::new(len),
            dead: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes of complete frames in this segment
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes belonging to superseded or tombstone frames
    pub fn dead_bytes(&self) -> u64 {
        self.dead.load(Ordering::Relaxed)
    }

    pub(crate) fn add_dead(&self, bytes: u64) {
        self.dead.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn reset_dead(&self) {
        self.dead.store(0, Ordering::Relaxed);
    }

    pub(crate) fn set_len(&self, len: u64) {
        self.len.store(len, Ordering::Release);
    }

    /// Read `len` bytes at `offset`
    pub(crate) fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let size = self.len();
        let end = offset.checked_add(u64::from(len));
        if end.map_or(true, |end| end > size) {
            return Err(StoreError::OffsetOutOfRange {
                segment_id: self.id,
                offset,
                len,
                size,
            });
        }

        let mut buf = vec![0u8; len as usize];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    /// Read every published byte of the segment
    pub(crate) fn read_all(&self) -> Result<Vec<u8>> {
        let size = self.len();
        let mut buf = vec![0u8; size as usize];
        read_exact_at(&self.file, &mut buf, 0)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("dead", &self.dead_bytes())
            .finish()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "segment ended before the requested range",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
