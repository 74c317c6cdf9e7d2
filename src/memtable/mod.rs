//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory, partitioned by column
//! - Single-writer/multi-reader access pattern
//! - Track entry count for the flush trigger
//! - Ordered iteration for SSTable creation and range scans
//!
//! ## Data Structure Choice
//! Using BTreeMap wrapped in RwLock:
//! - Ordered keys (required for SSTable generation)
//! - Column partitions never compare keys across namespaces
//!
//! The MemTable never decides when to flush; it only reports
//! `should_flush()`. The engine freezes it and swaps in a fresh one.

mod table;

pub use table::MemTable;
