//! Error types for TableKV
//!
//! Provides a unified error type for all operations. Every failure is
//! returned as a value; nothing panics past the crate boundary.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::codec::KeyType;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// What a `NotFound` / `AlreadyExists` error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Database,
    Table,
    Record,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Database => f.write_str("database"),
            Entity::Table => f.write_str("table"),
            Entity::Record => f.write_str("record"),
        }
    }
}

/// Unified error type for TableKV operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Namespace Errors
    // -------------------------------------------------------------------------
    #[error("{entity} '{name}' already exists")]
    AlreadyExists { entity: Entity, name: String },

    #[error("{entity} '{name}' not found")]
    NotFound { entity: Entity, name: String },

    #[error("invalid name '{0}': names must be non-empty and must not contain path separators")]
    InvalidName(String),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("a record with key {0} already exists")]
    DuplicateKey(String),

    #[error("key type mismatch: table expects {expected} keys, got '{found}'")]
    KeyTypeMismatch { expected: KeyType, found: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Segment / Index Consistency Errors (fatal for the table)
    // -------------------------------------------------------------------------
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("segment {0} not found")]
    SegmentNotFound(u64),

    #[error("read of {len} bytes at offset {offset} is out of range for segment {segment_id} ({size} bytes)")]
    OffsetOutOfRange {
        segment_id: u64,
        offset: u64,
        len: u32,
        size: u64,
    },

    #[error("table '{0}' is unusable after a consistency failure; rebuild it from its segments")]
    TableUnusable(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("timed out after {0:?} waiting for the table write lock")]
    LockTimeout(Duration),

    // -------------------------------------------------------------------------
    // I/O and Serialization Errors
    // -------------------------------------------------------------------------
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: Entity, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(entity: Entity, name: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    /// Errors that mean the index and the segments disagree.
    ///
    /// A table that hits one of these refuses further work until it is
    /// rebuilt from its segments.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptFrame(_)
                | StoreError::SegmentNotFound(_)
                | StoreError::OffsetOutOfRange { .. }
        )
    }

    /// True for `NotFound` errors about a record key
    pub fn is_key_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound {
                entity: Entity::Record,
                ..
            }
        )
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
