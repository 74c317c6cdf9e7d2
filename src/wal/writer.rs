//! WAL Writer
//!
//! Appends frames to the active segment. Every append is synced before it
//! returns; that sync is the commit point of a write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::{LsmError, Result};
use crate::types::Sequence;

use super::record::{encode_frame, encode_segment_header, SEGMENT_HEADER_SIZE};
use super::{segment_path, WalRecord};

/// Writes frames to one WAL segment
pub struct WalWriter {
    /// Segment id (file name stem)
    segment_id: u64,
    /// Segment file path
    path: PathBuf,
    /// Append handle
    file: File,
    /// Codec for frame payloads
    codec: Arc<dyn Codec>,
    /// Bytes in the segment including header
    len: u64,
    /// Highest sequence appended to this segment
    last_sequence: Sequence,
}

impl WalWriter {
    /// Create a fresh segment `id` in `dir`
    ///
    /// Fails if the segment already exists: segments are never reopened for
    /// appending, recovery always starts a new one.
    pub fn create(dir: &Path, id: u64, codec: Arc<dyn Codec>) -> Result<Self> {
        let path = segment_path(dir, id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .append(true)
            .open(&path)?;

        file.write_all(&encode_segment_header(codec.id()))?;
        file.sync_all()?;
        sync_dir(dir)?;

        tracing::debug!(segment = id, path = %path.display(), "opened WAL segment");

        Ok(Self {
            segment_id: id,
            path,
            file,
            codec,
            len: SEGMENT_HEADER_SIZE,
            last_sequence: 0,
        })
    }

    /// Append one record and sync. Returns its sequence.
    pub fn append(&mut self, record: &WalRecord) -> Result<Sequence> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Append records as a single frame and sync once.
    /// Returns the highest sequence in the batch.
    pub fn append_batch(&mut self, records: &[WalRecord]) -> Result<Sequence> {
        let Some(last) = records.iter().map(|r| r.sequence).max() else {
            return Err(LsmError::Serialization("empty WAL batch".into()));
        };

        let frame = encode_frame(records, self.codec.as_ref())?;
        if let Err(e) = self.file.write_all(&frame).and_then(|_| self.file.sync_data()) {
            // Drop any partial frame so later appends stay replayable
            if let Err(trunc) = self.file.set_len(self.len) {
                tracing::error!(segment = self.segment_id, error = %trunc, "failed to roll back partial WAL frame");
            }
            return Err(e.into());
        }

        self.len += frame.len() as u64;
        self.last_sequence = self.last_sequence.max(last);
        Ok(last)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current segment length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if no frame has been appended yet
    pub fn is_empty(&self) -> bool {
        self.len == SEGMENT_HEADER_SIZE
    }

    pub fn last_sequence(&self) -> Sequence {
        self.last_sequence
    }
}

/// fsync a directory so entry creation/removal/rename is durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
