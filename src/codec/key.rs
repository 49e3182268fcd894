//! Record keys
//!
//! Every table declares one key type at creation time. Keys of the other
//! type are rejected rather than coerced, so `1` and `"1"` never collide.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;

/// Declared key type of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Integer,
    String,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Integer => f.write_str("integer"),
            KeyType::String => f.write_str("string"),
        }
    }
}

impl FromStr for KeyType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(KeyType::Integer),
            "str" | "string" => Ok(KeyType::String),
            _ => Err(StoreError::InvalidArgument(format!(
                "unknown key type '{}' (expected 'integer' or 'string')",
                s
            ))),
        }
    }
}

/// A record key
///
/// Ordering puts all integer keys before all string keys; within a type
/// the natural ordering applies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// The type of this key
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Int(_) => KeyType::Integer,
            Key::Str(_) => KeyType::String,
        }
    }

    /// Parse a textual key for a table of the given key type
    pub fn parse(text: &str, key_type: KeyType) -> Result<Self> {
        match key_type {
            KeyType::Integer => text
                .trim()
                .parse::<i64>()
                .map(Key::Int)
                .map_err(|_| StoreError::KeyTypeMismatch {
                    expected: KeyType::Integer,
                    found: text.to_string(),
                }),
            KeyType::String => Ok(Key::Str(text.to_string())),
        }
    }

    /// Read a key out of a record's key field value
    ///
    /// No coercion: a JSON string on an integer table is a mismatch.
    pub fn from_json(value: &Value, key_type: KeyType) -> Result<Self> {
        match (key_type, value) {
            (KeyType::Integer, Value::Number(n)) if n.is_i64() => {
                n.as_i64().map(Key::Int).ok_or_else(|| mismatch(key_type, value))
            }
            (KeyType::String, Value::String(s)) => Ok(Key::Str(s.clone())),
            _ => Err(mismatch(key_type, value)),
        }
    }

    /// The key as it appears in a record's key field
    pub fn to_json(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Str(s) => Value::from(s.as_str()),
        }
    }

    /// Number of bytes `encode_into` writes
    pub fn encoded_len(&self) -> usize {
        match self {
            Key::Int(_) => 1 + 8,
            Key::Str(s) => 1 + s.len(),
        }
    }

    /// Append the tagged key bytes to `buf`
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        match self {
            Key::Int(i) => {
                buf.put_u8(TAG_INT);
                buf.put_i64(*i);
            }
            Key::Str(s) => {
                buf.put_u8(TAG_STR);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Decode tagged key bytes (the whole slice is the key)
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(StoreError::CorruptFrame("empty key".to_string()));
        }

        match raw.get_u8() {
            TAG_INT => {
                if raw.len() != 8 {
                    return Err(StoreError::CorruptFrame(format!(
                        "integer key has {} payload bytes, expected 8",
                        raw.len()
                    )));
                }
                Ok(Key::Int(raw.get_i64()))
            }
            TAG_STR => std::str::from_utf8(raw)
                .map(|s| Key::Str(s.to_string()))
                .map_err(|e| StoreError::CorruptFrame(format!("string key is not UTF-8: {}", e))),
            tag => Err(StoreError::CorruptFrame(format!(
                "unknown key tag 0x{:02x}",
                tag
            ))),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

fn mismatch(expected: KeyType, found: &Value) -> StoreError {
    StoreError::KeyTypeMismatch {
        expected,
        found: found.to_string(),
    }
}
