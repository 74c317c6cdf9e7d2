//! WAL Recovery
//!
//! Handles crash recovery by replaying WAL segments in order.
//!
//! A torn write can only sit at the tail of the log, so the first bad frame
//! ends replay. Recovery then makes the on-disk log agree with what was
//! replayed: the bad segment is cut back to its last good frame and any
//! later segments are removed.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::{LsmError, Result};
use crate::types::Sequence;

use super::record::SEGMENT_HEADER_SIZE;
use super::writer::sync_dir;
use super::{list_segments, segment_path, WalReader, WalRecord};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Records returned for replay
    pub records_recovered: u64,

    /// Records already captured by an SSTable flush
    pub records_skipped: u64,

    /// Highest sequence seen in the log (replayed or skipped)
    pub last_sequence: Sequence,

    /// Segments read
    pub segments_replayed: u64,

    /// Whether replay stopped at a torn or corrupt frame
    pub truncated: bool,
}

impl WalRecovery {
    /// Recover records from every segment in `dir`
    ///
    /// Records with `sequence <= flushed_through` are already durable in an
    /// SSTable and are skipped. Returned records are in sequence order.
    pub fn recover(
        dir: &Path,
        codec: &Arc<dyn Codec>,
        flushed_through: Sequence,
    ) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        let mut records = Vec::new();
        let mut result = RecoveryResult::default();
        let segments = list_segments(dir)?;

        for (position, &id) in segments.iter().enumerate() {
            let path = segment_path(dir, id);
            result.segments_replayed += 1;

            let torn_at = match WalReader::open(&path, id, codec) {
                Ok(reader) => Self::replay_segment(reader, flushed_through, &mut records, &mut result)?,
                Err(LsmError::TruncatedLog { offset, .. }) => Some(offset),
                Err(e) => return Err(e),
            };

            if let Some(offset) = torn_at {
                result.truncated = true;
                Self::repair(dir, id, offset, &segments[position + 1..])?;
                break;
            }
        }

        records.sort_by_key(|r| r.sequence);
        Ok((records, result))
    }

    /// Scan every segment and report stats without repairing anything
    pub fn verify(dir: &Path, codec: &Arc<dyn Codec>) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::default();
        let mut sink = Vec::new();

        for id in list_segments(dir)? {
            result.segments_replayed += 1;
            let torn = match WalReader::open(&segment_path(dir, id), id, codec) {
                Ok(reader) => Self::replay_segment(reader, 0, &mut sink, &mut result)?.is_some(),
                Err(LsmError::TruncatedLog { .. }) => true,
                Err(e) => return Err(e),
            };
            sink.clear();
            if torn {
                result.truncated = true;
                break;
            }
        }
        Ok(result)
    }

    /// Replay one segment. Returns the torn offset if a bad frame ended it.
    fn replay_segment(
        reader: WalReader,
        flushed_through: Sequence,
        records: &mut Vec<WalRecord>,
        result: &mut RecoveryResult,
    ) -> Result<Option<u64>> {
        for frame in reader.frames() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(LsmError::TruncatedLog { offset, .. }) => return Ok(Some(offset)),
                Err(e) => return Err(e),
            };

            for record in frame {
                result.last_sequence = result.last_sequence.max(record.sequence);
                if record.sequence <= flushed_through {
                    result.records_skipped += 1;
                } else {
                    result.records_recovered += 1;
                    records.push(record);
                }
            }
        }
        Ok(None)
    }

    /// Cut the torn segment back to `valid_len` and drop later segments
    fn repair(dir: &Path, id: u64, valid_len: u64, later: &[u64]) -> Result<()> {
        let path = segment_path(dir, id);

        if valid_len < SEGMENT_HEADER_SIZE {
            tracing::warn!(segment = id, "WAL segment header torn, removing segment");
            fs::remove_file(&path)?;
        } else {
            tracing::warn!(
                segment = id,
                valid_len,
                "WAL tail corruption detected, truncating to last valid frame"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        for &later_id in later {
            tracing::warn!(segment = later_id, "removing WAL segment past torn frame");
            fs::remove_file(segment_path(dir, later_id))?;
        }

        sync_dir(dir)
    }
}
