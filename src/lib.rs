//! # TableKV
//!
//! An embedded, log-structured record store:
//! - Databases are directories, tables are subdirectories
//! - Each table is a set of append-only segment files plus an in-memory index
//! - Crash recovery by replaying segments (torn tails are trimmed)
//! - Single-writer/multi-reader concurrency per table
//! - Compaction reclaims space held by superseded and deleted records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Store (catalog)                           │
//! │        databases / tables / Command execution               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Arc<Table>
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Table                                  │
//! │      (write lock, sequence counter, unusable state)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Segments   │◄─────────│    Index    │
//!   │  (Append)   │ location │  (RwLock)   │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │  Compactor  │
//!   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use tablekv::{Key, KeyType, Store};
//!
//! let store = Store::open_path("./data")?;
//! store.create_database("app")?;
//! let users = store.create_table("app", "users", KeyType::Integer)?;
//!
//! let record = json!({"id": 1, "name": "John"}).as_object().cloned().unwrap_or_default();
//! users.insert(&Key::Int(1), record)?;
//! assert_eq!(users.get(&Key::Int(1))?["name"], "John");
//! # Ok::<(), tablekv::StoreError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod segment;
pub mod index;
pub mod table;
pub mod compaction;
pub mod catalog;
pub mod command;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Entity, Result, StoreError};
pub use config::{Config, SyncStrategy};
pub use codec::{Key, KeyType, Record};
pub use table::{Table, TableOptions, TableStats};
pub use compaction::CompactionStats;
pub use catalog::Store;
pub use command::{Command, Output};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TableKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
