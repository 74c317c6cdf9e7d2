//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append column-tagged records before any mutation becomes visible
//! - CRC32 checksums for torn-write detection
//! - Compression of every frame through the configured codec
//! - Segment rotation so flushed data can be dropped
//! - Crash recovery and replay
//!
//! ## Segment Format
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header: Magic "LWAL" (4) | Ver (2) | Codec (1) │
//! ├─────────────────────────────────────────────┤
//! │ Frame 1                                     │
//! │ ┌─────────┬─────────┬─────────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ codec(bincode(recs))│ │
//! │ └─────────┴─────────┴─────────────────────┘ │
//! ├─────────────────────────────────────────────┤
//! │ Frame 2 ...                                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! A frame holds one or more records: a single `put` is a one-record frame,
//! a batch is one frame, so a torn batch is never half-applied on replay.

mod record;
mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use record::{WalRecord, FRAME_HEADER_SIZE, SEGMENT_HEADER_SIZE};
pub use writer::WalWriter;
pub(crate) use writer::sync_dir;
pub use reader::WalReader;
pub use recovery::{WalRecovery, RecoveryResult};

/// Path of the segment with the given id
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.log", id))
}

/// Ids of all segments in `dir`, ascending
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Delete every segment older than `id`. Returns how many were removed.
pub fn remove_segments_before(dir: &Path, id: u64) -> Result<usize> {
    let mut removed = 0;
    for old in list_segments(dir)?.into_iter().filter(|&s| s < id) {
        fs::remove_file(segment_path(dir, old))?;
        removed += 1;
    }
    Ok(removed)
}
