//! Configuration for TableKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a TableKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all databases
    /// Internal structure:
    ///   {root_dir}/
    ///     └── {database}/
    ///           └── {table}/
    ///                 ├── table.meta
    ///                 └── segment-0000000001.log ...
    pub root_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Size (bytes) an active segment may reach before it is sealed
    pub max_segment_size: u64,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Max time a writer waits for a table's write lock (None = forever)
    pub lock_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Compact automatically after writes once the dead ratio is exceeded
    pub auto_compact: bool,

    /// Dead bytes / total bytes (sealed segments only) that triggers compaction
    pub compaction_dead_ratio: f64,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every frame (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced frames (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./tablekv_data"),
            max_segment_size: 4 * 1024 * 1024, // 4 MB
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            lock_timeout: Some(Duration::from_secs(5)),
            auto_compact: true,
            compaction_dead_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage root directory
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the segment seal threshold (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set how long writers wait for a table write lock
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Enable or disable automatic compaction
    pub fn auto_compact(mut self, enabled: bool) -> Self {
        self.config.auto_compact = enabled;
        self
    }

    /// Set the dead-byte ratio that triggers automatic compaction
    pub fn compaction_dead_ratio(mut self, ratio: f64) -> Self {
        self.config.compaction_dead_ratio = ratio;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
