//! Table metadata
//!
//! The declared key type and key field of a table, persisted next to its
//! segments. Written once at creation, never rewritten.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::KeyType;
use crate::error::{Result, StoreError};
use crate::segment::sync_dir;

pub(crate) const META_FILE: &str = "table.meta";
const META_TEMP: &str = "table.meta.tmp";

/// Current metadata format version
pub const FORMAT_VERSION: u16 = 1;

/// Options for creating a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub key_type: KeyType,
    /// Record field that holds the key
    pub key_field: String,
}

impl TableOptions {
    /// Options with the default key field `"id"`
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            key_field: "id".to_string(),
        }
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }
}

/// Persisted table declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub format_version: u16,
    pub key_type: KeyType,
    pub key_field: String,
}

impl TableMeta {
    pub fn from_options(options: &TableOptions) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            key_type: options.key_type,
            key_field: options.key_field.clone(),
        }
    }

    /// Load `table.meta` from a table directory
    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(META_FILE))?;
        let meta: TableMeta = bincode::deserialize(&bytes)?;

        if meta.format_version > FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "table format version {} is newer than supported version {}",
                meta.format_version, FORMAT_VERSION
            )));
        }

        Ok(meta)
    }

    /// Write `table.meta` atomically (temp file + rename)
    pub fn store(&self, dir: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;

        let temp = dir.join(META_TEMP);
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        fs::rename(&temp, dir.join(META_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }
}
