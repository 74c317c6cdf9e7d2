//! # columnlsm
//!
//! An embedded LSM-tree key-value engine with column namespaces:
//! - Write-Ahead Logging (WAL) with per-append sync for durability
//! - Crash recovery with torn-tail truncation
//! - Single-writer/multi-reader concurrency over immutable snapshots
//! - Bloom-filtered, block-compressed SSTables
//! - Leveled background compaction with tombstone garbage collection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LsmTree                               │
//! │        put / delete / write(batch) / get / scan_range        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │ (segments)  │          │ (per column)│
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush
//!                                   ▼
//!                           ┌─────────────┐      ┌─────────────┐
//!                           │  SSTables   │◀────▶│ Compaction  │
//!                           │ (L0 .. Ln)  │      │  (worker)   │
//!                           └──────┬──────┘      └─────────────┘
//!                                  │
//!                                  ▼
//!                           ┌─────────────┐
//!                           │  MANIFEST   │
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use columnlsm::{Config, LsmTree};
//!
//! # fn main() -> columnlsm::Result<()> {
//! let tree = LsmTree::open(Config::builder().data_dir("/tmp/columnlsm").build())?;
//! tree.put("metrics", b"cpu", b"0.93")?;
//! assert_eq!(tree.get("metrics", b"cpu")?, Some(b"0.93".to_vec()));
//!
//! for pair in tree.scan_range("metrics", b"a", b"z") {
//!     let (key, value) = pair?;
//!     println!("{:?} = {:?}", key, value);
//! }
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod codec;
pub mod types;

pub mod bloom;
pub mod wal;
pub mod memtable;
pub mod storage;
pub mod iterator;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LsmError, Result};
pub use config::Config;
pub use engine::{LsmTree, WriteBatch};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of columnlsm
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
