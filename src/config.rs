//! Configuration for columnlsm
//!
//! Centralized configuration with sensible defaults. Every flush and
//! compaction threshold is explicit here rather than hardcoded in the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codec, SnappyCodec};
use crate::error::{LsmError, Result};

/// Main configuration for an LsmTree instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files. The engine owns everything below it.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (live SSTable set, atomically replaced)
    ///     ├── wal/             (write-ahead log segments)
    ///     └── sst/             (SSTable files)
    pub data_dir: PathBuf,

    /// Compression applied to WAL frames and SSTable data blocks
    pub codec: Arc<dyn Codec>,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Number of entries after which the MemTable is flushed
    pub memtable_entry_limit: usize,

    /// Flush a non-empty MemTable on this interval from the background worker
    pub flush_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // SSTable Configuration
    // -------------------------------------------------------------------------
    /// Uncompressed bytes per data block (one sparse index sample per block)
    pub block_size: usize,

    /// Target false-positive probability of each table's bloom filter
    pub bloom_false_positive_rate: f64,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Level-0 table count (per column) that triggers compaction
    pub level0_file_trigger: usize,

    /// Byte budget of level 1; level N gets `base * multiplier^(N-1)`
    pub level_base_bytes: u64,

    /// Growth factor between consecutive level budgets
    pub level_size_multiplier: u64,

    /// Number of levels; the last one is never compacted further
    pub max_levels: u32,

    /// Compaction output files are cut once they reach this size
    pub target_file_size: u64,

    /// Run compaction on the background worker instead of inline
    pub background_compaction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./columnlsm_data"),
            codec: Arc::new(SnappyCodec),
            memtable_entry_limit: 1024,
            flush_interval: None,
            block_size: 4 * 1024,
            bloom_false_positive_rate: 0.01,
            level0_file_trigger: 4,
            level_base_bytes: 8 * 1024 * 1024,
            level_size_multiplier: 10,
            max_levels: 4,
            target_file_size: 2 * 1024 * 1024,
            background_compaction: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_entry_limit == 0 {
            return Err(LsmError::Config("memtable_entry_limit must be > 0".into()));
        }
        if self.block_size == 0 {
            return Err(LsmError::Config("block_size must be > 0".into()));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(LsmError::Config(format!(
                "bloom_false_positive_rate must be in (0, 1), got {}",
                self.bloom_false_positive_rate
            )));
        }
        if self.level0_file_trigger < 2 {
            return Err(LsmError::Config("level0_file_trigger must be >= 2".into()));
        }
        if self.max_levels < 2 {
            return Err(LsmError::Config("max_levels must be >= 2".into()));
        }
        if self.level_size_multiplier < 2 {
            return Err(LsmError::Config("level_size_multiplier must be >= 2".into()));
        }
        if self.flush_interval.is_some_and(|d| d.is_zero()) {
            return Err(LsmError::Config("flush_interval must be > 0".into()));
        }
        if self.target_file_size == 0 {
            return Err(LsmError::Config("target_file_size must be > 0".into()));
        }
        Ok(())
    }

    /// Byte budget for a level (level 0 is governed by file count instead)
    pub fn level_budget(&self, level: u32) -> u64 {
        if level == 0 {
            return u64::MAX;
        }
        self.level_base_bytes
            .saturating_mul(self.level_size_multiplier.saturating_pow(level - 1))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the compression codec
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.config.codec = codec;
        self
    }

    /// Set the memtable flush threshold (in entries)
    pub fn memtable_entry_limit(mut self, entries: usize) -> Self {
        self.config.memtable_entry_limit = entries;
        self
    }

    /// Enable periodic flushing
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = Some(interval);
        self
    }

    /// Set the data block size (in bytes)
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.config.block_size = bytes;
        self
    }

    /// Set the bloom filter false-positive target
    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.config.bloom_false_positive_rate = rate;
        self
    }

    /// Set the level-0 compaction trigger (in tables)
    pub fn level0_file_trigger(mut self, count: usize) -> Self {
        self.config.level0_file_trigger = count;
        self
    }

    /// Set the level-1 byte budget
    pub fn level_base_bytes(mut self, bytes: u64) -> Self {
        self.config.level_base_bytes = bytes;
        self
    }

    /// Set the growth factor between level budgets
    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.config.level_size_multiplier = multiplier;
        self
    }

    /// Set the number of levels
    pub fn max_levels(mut self, levels: u32) -> Self {
        self.config.max_levels = levels;
        self
    }

    /// Set the compaction output file size
    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.config.target_file_size = bytes;
        self
    }

    /// Choose between background and inline compaction
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
