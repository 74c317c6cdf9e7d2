//! Manifest
//!
//! The manifest is the sole record of which SSTables are live. It is
//! rewritten in full on every flush and compaction through an atomic
//! replace: write `MANIFEST.tmp`, fsync, rename over `MANIFEST`, fsync the
//! directory. A crash at any point leaves either the old or the new file.
//!
//! ## File Format
//! ```text
//! ┌───────────┬──────────┬──────────┬──────────────────────┐
//! │ Magic (4) │ CRC (4)  │ Len (4)  │ bincode(ManifestData)│
//! └───────────┴──────────┴──────────┴──────────────────────┘
//! ```

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};
use crate::types::Sequence;
use crate::wal::sync_dir;

use super::sstable::TableMeta;

const MAGIC: &[u8; 4] = b"LMAN";
const HEADER_SIZE: usize = 12;

pub const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Persisted engine layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    /// Next SSTable generation to hand out
    pub next_generation: u64,
    /// Every WAL record up to this sequence is captured in an SSTable
    pub last_flushed_sequence: Sequence,
    /// Live tables, all columns
    pub tables: Vec<TableMeta>,
    /// Corrupt tables moved out of the level structure, kept on disk for
    /// manual recovery
    pub quarantined: Vec<TableMeta>,
}

impl ManifestData {
    /// Tables of one column
    pub fn column_tables<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a TableMeta> + 'a {
        self.tables.iter().filter(move |t| t.column == column)
    }

    /// Whether `generation` is a live table
    pub fn contains(&self, generation: u64) -> bool {
        self.tables.iter().any(|t| t.generation == generation)
    }

    /// Whether the file of `generation` must stay on disk (live or quarantined)
    pub fn references(&self, generation: u64) -> bool {
        self.contains(generation) || self.quarantined.iter().any(|t| t.generation == generation)
    }

    /// Move the listed generations from the live set into quarantine
    pub fn quarantine(&mut self, generations: &[u64]) {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tables)
            .into_iter()
            .partition(|t| generations.contains(&t.generation));
        self.tables = kept;
        self.quarantined.extend(moved);
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
}

/// Load the manifest; a missing file means a fresh engine
pub fn load(dir: &Path) -> Result<ManifestData> {
    let bytes = match fs::read(manifest_path(dir)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ManifestData::default()),
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
        return Err(LsmError::CorruptManifest("bad header".into()));
    }
    let mut header = &bytes[4..HEADER_SIZE];
    let crc = header.get_u32_le();
    let len = header.get_u32_le() as usize;

    let body = &bytes[HEADER_SIZE..];
    if body.len() != len {
        return Err(LsmError::CorruptManifest(format!(
            "length mismatch: header says {}, found {}",
            len,
            body.len()
        )));
    }
    if crc32fast::hash(body) != crc {
        return Err(LsmError::CorruptManifest("checksum mismatch".into()));
    }

    bincode::deserialize(body).map_err(|e| LsmError::CorruptManifest(e.to_string()))
}

/// Atomically replace the manifest
pub fn store(dir: &Path, data: &ManifestData) -> Result<()> {
    let body = bincode::serialize(data)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_slice(MAGIC);
    buf.put_u32_le(crc32fast::hash(&body));
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);

    let tmp = dir.join(MANIFEST_TMP_FILENAME);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, manifest_path(dir))?;
    sync_dir(dir)
}
