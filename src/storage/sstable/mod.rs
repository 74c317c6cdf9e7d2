//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted storage for one column.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Blocks (variable, each codec-compressed)           │
//! │   [KeyLen: u32][Key][Seq: u64][ValLen: u32][Value]      │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (sparse: one sample per data block)         │
//! │   [Count: u32] then per block:                          │
//! │   [KeyLen: u32][FirstKey][Offset: u64][Len: u32][CRC]   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block (bloom filter over every key)              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Meta Block: bincode(TableMeta)                          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (60 bytes)                                       │
//! │   IndexOff/Len, FilterOff/Len, MetaOff/Len (6 x u64)    │
//! │   TailCRC: u32 | Codec: u8 | Pad: u8 | Version: u16     │
//! │   Magic: "LSST" (4)                                     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Tables are written to a temporary path and renamed into place, so a reader
//! never observes a partial file.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::types::{in_range, Entry, Sequence};

pub use builder::{BuildOptions, SSTableBuilder};
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying an SSTable file
pub(crate) const MAGIC: &[u8; 4] = b"LSST";

/// Current SSTable format version
pub(crate) const VERSION: u16 = 1;

/// Footer size: 6 x u64 + CRC (4) + Codec (1) + Pad (1) + Version (2) + Magic (4)
pub(crate) const FOOTER_SIZE: u64 = 60;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Extension of live table files
pub(crate) const TABLE_EXT: &str = "sst";

/// Extension of tables still being written
pub(crate) const TMP_EXT: &str = "tmp";

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata persisted in the table's meta block and in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Column namespace of every entry in the table
    pub column: String,
    /// Creation order; also the file name
    pub generation: u64,
    /// LSM level (0 = flush output)
    pub level: u32,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    /// Number of entries, tombstones included
    pub entry_count: u64,
    /// Lowest sequence stored
    pub min_sequence: Sequence,
    /// Highest sequence stored
    pub max_sequence: Sequence,
    /// File size in bytes (0 inside the meta block itself)
    pub file_size: u64,
}

impl TableMeta {
    /// Quick check if a key might be in this SSTable (range check)
    pub fn key_in_range(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && in_range(key, &self.min_key, &self.max_key)
    }

    /// Whether `[low, high]` intersects this table's key span
    pub fn overlaps(&self, low: &[u8], high: &[u8]) -> bool {
        self.entry_count > 0 && low <= self.max_key.as_slice() && high >= self.min_key.as_slice()
    }
}

/// Location of one data block, as recorded in the sparse index
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub first_key: Vec<u8>,
    pub offset: u64,
    pub len: u32,
    pub crc: u32,
}

/// Generate the file path for a table
pub fn table_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{:08}.{}", generation, TABLE_EXT))
}

/// Parse a table generation from its file name
/// "00000042.sst" → Some(42)
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != TABLE_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

// =============================================================================
// Block Encoding
// =============================================================================

pub(crate) fn encode_entry(buf: &mut BytesMut, entry: &Entry) {
    buf.put_u32_le(entry.key.len() as u32);
    buf.put_slice(&entry.key);
    buf.put_u64_le(entry.sequence);
    match &entry.value {
        Some(v) => {
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
        None => buf.put_u32_le(TOMBSTONE_MARKER),
    }
}

/// Decode every entry of an uncompressed block
pub(crate) fn decode_block(mut data: &[u8]) -> Option<Vec<Entry>> {
    let mut entries = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 4 {
            return None;
        }
        let key_len = data.get_u32_le() as usize;
        if data.remaining() < key_len + 12 {
            return None;
        }
        let key = data[..key_len].to_vec();
        data.advance(key_len);
        let sequence = data.get_u64_le();
        let val_len = data.get_u32_le();

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let val_len = val_len as usize;
            if data.remaining() < val_len {
                return None;
            }
            let v = data[..val_len].to_vec();
            data.advance(val_len);
            Some(v)
        };

        entries.push(Entry {
            key,
            value,
            sequence,
        });
    }
    Some(entries)
}

pub(crate) fn encode_index(handles: &[BlockHandle]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(handles.len() as u32);
    for h in handles {
        buf.put_u32_le(h.first_key.len() as u32);
        buf.put_slice(&h.first_key);
        buf.put_u64_le(h.offset);
        buf.put_u32_le(h.len);
        buf.put_u32_le(h.crc);
    }
    buf.to_vec()
}

pub(crate) fn decode_index(mut data: &[u8]) -> Option<Vec<BlockHandle>> {
    if data.remaining() < 4 {
        return None;
    }
    let count = data.get_u32_le() as usize;
    let mut handles = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        if data.remaining() < 4 {
            return None;
        }
        let key_len = data.get_u32_le() as usize;
        if data.remaining() < key_len + 16 {
            return None;
        }
        let first_key = data[..key_len].to_vec();
        data.advance(key_len);
        handles.push(BlockHandle {
            first_key,
            offset: data.get_u64_le(),
            len: data.get_u32_le(),
            crc: data.get_u32_le(),
        });
    }
    if data.has_remaining() {
        return None;
    }
    Some(handles)
}

/// Decoded footer fields
#[derive(Debug, Clone, Copy)]
pub(crate) struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub filter_offset: u64,
    pub filter_len: u64,
    pub meta_offset: u64,
    pub meta_len: u64,
    pub tail_crc: u32,
    pub codec_id: u8,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FOOTER_SIZE as usize);
        buf.put_u64_le(self.index_offset);
        buf.put_u64_le(self.index_len);
        buf.put_u64_le(self.filter_offset);
        buf.put_u64_le(self.filter_len);
        buf.put_u64_le(self.meta_offset);
        buf.put_u64_le(self.meta_len);
        buf.put_u32_le(self.tail_crc);
        buf.put_u8(self.codec_id);
        buf.put_u8(0);
        buf.put_u16_le(VERSION);
        buf.put_slice(MAGIC);
        buf.to_vec()
    }

    /// Parse and sanity-check a footer against the file size
    pub fn decode(mut data: &[u8], file_size: u64) -> std::result::Result<Self, String> {
        if data.len() != FOOTER_SIZE as usize {
            return Err("short footer".into());
        }
        if &data[56..60] != MAGIC {
            return Err(format!("bad magic {:?}", &data[56..60]));
        }
        let footer = Footer {
            index_offset: data.get_u64_le(),
            index_len: data.get_u64_le(),
            filter_offset: data.get_u64_le(),
            filter_len: data.get_u64_le(),
            meta_offset: data.get_u64_le(),
            meta_len: data.get_u64_le(),
            tail_crc: data.get_u32_le(),
            codec_id: data.get_u8(),
        };
        data.advance(1);
        let version = data.get_u16_le();
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }

        let contiguous = footer.index_offset.checked_add(footer.index_len) == Some(footer.filter_offset)
            && footer.filter_offset.checked_add(footer.filter_len) == Some(footer.meta_offset)
            && footer.meta_offset.checked_add(footer.meta_len) == Some(file_size - FOOTER_SIZE);
        if !contiguous {
            return Err("footer offsets out of bounds".into());
        }
        Ok(footer)
    }
}
