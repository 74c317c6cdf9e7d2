//! Storage Module
//!
//! Persistent storage layer: SSTables, the manifest, versions and compaction.
//!
//! ## Responsibilities
//! - Persist flushed data to disk in sorted, compressed, checksummed tables
//! - Efficient point lookups (bloom filter + sparse index) and range scans
//! - Authoritative live-table set per column (manifest, atomic replace)
//! - Background compaction across levels
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST
//!   └── sst/
//!       ├── 00000001.sst
//!       └── 00000002.sst
//! ```

pub mod compaction;
pub mod manifest;
mod manager;
pub mod sstable;
mod version;

pub use compaction::{CompactionPicker, CompactionStats, CompactionTask};
pub use manager::StorageManager;
pub use manifest::ManifestData;
pub use sstable::{BuildOptions, SSTableBuilder, SSTableIterator, SSTableReader, TableMeta};
pub use version::Version;
