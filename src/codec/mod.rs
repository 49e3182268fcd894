//! Record Codec Module
//!
//! Serializes records and tombstones into length-prefixed, checksummed
//! binary frames, and parses them back.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬───────────┬───────────┬──────────┬───────────┬─────────────┬──────────┐
//! │ Kind (1) │KeyLen (4) │ Key bytes │ Seq (8)  │ValLen (4) │ Value (JSON)│ CRC (4)  │
//! └──────────┴───────────┴───────────┴──────────┴───────────┴─────────────┴──────────┘
//! ```
//!
//! - Kind: 1 = write, 2 = tombstone (ValLen = 0, no value bytes)
//! - Key bytes: tag (1) + payload; tag 0 = i64 big-endian, tag 1 = UTF-8
//! - All integers are little-endian except the integer key payload
//! - CRC32 covers every byte of the frame before it

mod frame;
mod key;

pub use frame::{Decoded, Frame, FrameKind, FRAME_OVERHEAD, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use key::{Key, KeyType};

use serde_json::Value;

use crate::error::{Result, StoreError};

/// A record: field name → JSON value
pub type Record = serde_json::Map<String, Value>;

/// Parse a JSON document into a record
///
/// The document must be a JSON object.
pub fn parse_record(text: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| StoreError::InvalidRecord(format!("not valid JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRecord(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
