//! Frame definitions
//!
//! A frame is the unit written to a segment: one record version or one
//! tombstone, self-delimiting and checksummed.

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::{json_kind, Key, Record};

/// Fixed bytes per frame: kind (1) + key_len (4) + seq (8) + value_len (4) + crc (4)
pub const FRAME_OVERHEAD: usize = 21;

/// Largest encoded key accepted by the decoder (64 KB)
pub const MAX_KEY_LEN: usize = 64 * 1024;

/// Largest encoded value accepted by the decoder (64 MB)
pub const MAX_VALUE_LEN: usize = 64 * 1024 * 1024;

/// Bytes before the key: kind (1) + key_len (4)
const PREFIX_LEN: usize = 5;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Write = 0x01,
    Tombstone = 0x02,
}

impl FrameKind {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x01 => Ok(FrameKind::Write),
            0x02 => Ok(FrameKind::Tombstone),
            _ => Err(StoreError::CorruptFrame(format!(
                "unknown frame kind 0x{:02x}",
                b
            ))),
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub key: Key,
    /// Table-wide write sequence number
    pub sequence: u64,
    /// The record for write frames, None for tombstones
    pub value: Option<Record>,
}

/// Outcome of parsing a frame from the front of a buffer
#[derive(Debug)]
pub enum Decoded {
    /// A whole, valid frame occupying `len` bytes
    Complete { frame: Frame, len: usize },

    /// The buffer ends before the frame does
    Incomplete,

    /// The frame is fully present but its checksum does not match
    ChecksumMismatch { len: usize },
}

impl Frame {
    /// Create a record-write frame
    pub fn write(key: Key, sequence: u64, record: Record) -> Self {
        Self {
            kind: FrameKind::Write,
            key,
            sequence,
            value: Some(record),
        }
    }

    /// Create a tombstone frame
    pub fn tombstone(key: Key, sequence: u64) -> Self {
        Self {
            kind: FrameKind::Tombstone,
            key,
            sequence,
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == FrameKind::Tombstone
    }

    /// Serialize into a complete frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match &self.value {
            Some(record) => serde_json::to_vec(record)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };

        let key_len = self.key.encoded_len();
        if key_len > MAX_KEY_LEN {
            return Err(StoreError::InvalidRecord(format!(
                "key is {} bytes, limit is {}",
                key_len, MAX_KEY_LEN
            )));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreError::InvalidRecord(format!(
                "record is {} bytes, limit is {}",
                value.len(),
                MAX_VALUE_LEN
            )));
        }

        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + key_len + value.len());
        buf.put_u8(self.kind as u8);
        buf.put_u32_le(key_len as u32);
        self.key.encode_into(&mut buf);
        buf.put_u64_le(self.sequence);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(&value);

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        Ok(buf)
    }

    /// Decode a buffer holding exactly one frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match Self::decode_prefix(bytes)? {
            Decoded::Complete { frame, len } if len == bytes.len() => Ok(frame),
            Decoded::Complete { len, .. } => Err(StoreError::CorruptFrame(format!(
                "frame is {} bytes but {} were supplied",
                len,
                bytes.len()
            ))),
            Decoded::Incomplete => Err(StoreError::CorruptFrame(format!(
                "truncated frame ({} bytes)",
                bytes.len()
            ))),
            Decoded::ChecksumMismatch { .. } => {
                Err(StoreError::CorruptFrame("checksum mismatch".to_string()))
            }
        }
    }

    /// Parse the frame at the front of `bytes`
    ///
    /// Length fields are validated before they are trusted, so garbage can
    /// never cause a huge allocation or an out-of-bounds read.
    pub fn decode_prefix(bytes: &[u8]) -> Result<Decoded> {
        if bytes.len() < PREFIX_LEN {
            return Ok(Decoded::Incomplete);
        }

        let mut header = &bytes[..PREFIX_LEN];
        let kind = FrameKind::from_byte(header.get_u8())?;
        let key_len = header.get_u32_le() as usize;
        if key_len == 0 || key_len > MAX_KEY_LEN {
            return Err(StoreError::CorruptFrame(format!(
                "key length {} outside 1..={}",
                key_len, MAX_KEY_LEN
            )));
        }

        let seq_start = PREFIX_LEN + key_len;
        let value_start = seq_start + 8 + 4;
        if bytes.len() < value_start {
            return Ok(Decoded::Incomplete);
        }

        let mut middle = &bytes[seq_start..value_start];
        let sequence = middle.get_u64_le();
        let value_len = middle.get_u32_le() as usize;
        if value_len > MAX_VALUE_LEN {
            return Err(StoreError::CorruptFrame(format!(
                "value length {} exceeds {}",
                value_len, MAX_VALUE_LEN
            )));
        }
        if kind == FrameKind::Tombstone && value_len != 0 {
            return Err(StoreError::CorruptFrame(format!(
                "tombstone carries {} value bytes",
                value_len
            )));
        }

        let crc_start = value_start + value_len;
        let total = crc_start + 4;
        if bytes.len() < total {
            return Ok(Decoded::Incomplete);
        }

        let stored_crc = (&bytes[crc_start..total]).get_u32_le();
        if crc32fast::hash(&bytes[..crc_start]) != stored_crc {
            return Ok(Decoded::ChecksumMismatch { len: total });
        }

        let key = Key::decode(&bytes[PREFIX_LEN..seq_start])?;
        let value = match kind {
            FrameKind::Write => Some(decode_record(&bytes[value_start..crc_start])?),
            FrameKind::Tombstone => None,
        };

        Ok(Decoded::Complete {
            frame: Frame {
                kind,
                key,
                sequence,
                value,
            },
            len: total,
        })
    }
}

fn decode_record(bytes: &[u8]) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::CorruptFrame(format!("record is not valid JSON: {}", e)))?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::CorruptFrame(format!(
            "record must be a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}
