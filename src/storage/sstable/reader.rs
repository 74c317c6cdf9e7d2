//! SSTable Reader
//!
//! Opens SSTable files and serves point lookups and range scans. The sparse
//! index, bloom filter and metadata stay in memory; data blocks are read and
//! decompressed on demand.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::codec::{self, Codec};
use crate::error::{LsmError, Result};
use crate::types::Entry;

use super::iterator::SSTableIterator;
use super::{decode_block, decode_index, BlockHandle, Footer, TableMeta, FOOTER_SIZE};

/// Reader for one SSTable file
///
/// Readers are shared through `Arc`. A reader replaced by compaction is
/// marked obsolete and deletes its file once the last in-flight user drops it.
pub struct SSTableReader {
    path: PathBuf,
    /// File handle for block reads
    file: Mutex<File>,
    /// Sparse index, ordered by first key
    index: Vec<BlockHandle>,
    bloom: BloomFilter,
    meta: TableMeta,
    codec: Arc<dyn Codec>,
    /// Set when a block failed verification
    corrupt: AtomicBool,
    /// Set once the table left the live set
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Any failure to read or verify the footer, index, filter or meta block
    /// is reported as `CorruptSegment`.
    pub fn open(path: &Path, configured: &Arc<dyn Codec>) -> Result<Self> {
        let corrupt = |reason: String| LsmError::corrupt(path, reason);

        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(corrupt("file missing".into()))
            }
            Err(e) => return Err(e.into()),
        };
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE {
            return Err(corrupt(format!("file too small ({} bytes)", file_size)));
        }

        // Step 1: footer
        let mut footer_buf = vec![0u8; FOOTER_SIZE as usize];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf, file_size).map_err(corrupt)?;

        // Step 2: index + filter + meta, verified as one region
        let tail_len = (file_size - FOOTER_SIZE - footer.index_offset) as usize;
        let mut tail = vec![0u8; tail_len];
        file.seek(SeekFrom::Start(footer.index_offset))?;
        file.read_exact(&mut tail)?;
        if crc32fast::hash(&tail) != footer.tail_crc {
            return Err(corrupt("metadata checksum mismatch".into()));
        }

        let (index_bytes, rest) = tail.split_at(footer.index_len as usize);
        let (filter_bytes, meta_bytes) = rest.split_at(footer.filter_len as usize);

        let index = decode_index(index_bytes).ok_or_else(|| corrupt("malformed index".into()))?;
        let bloom = BloomFilter::decode(filter_bytes).map_err(|e| corrupt(e.to_string()))?;
        let mut meta: TableMeta =
            bincode::deserialize(meta_bytes).map_err(|e| corrupt(format!("meta block: {}", e)))?;
        meta.file_size = file_size;

        let data_end = footer.index_offset;
        if index
            .iter()
            .any(|h| h.offset.checked_add(h.len as u64).map_or(true, |end| end > data_end))
        {
            return Err(corrupt("index points past data section".into()));
        }

        let codec = codec::resolve(footer.codec_id, configured)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            bloom,
            meta,
            codec,
            corrupt: AtomicBool::new(false),
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present (value or tombstone)
    /// - `Ok(None)`: key not in this table; a bloom filter negative
    ///   answers without any disk read
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.meta.key_in_range(key) || !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let Some(block) = self.block_for(key) else {
            return Ok(None);
        };

        let entries = self.read_block(block)?;
        Ok(entries
            .binary_search_by(|e| e.key.as_slice().cmp(key))
            .ok()
            .map(|i| entries[i].clone()))
    }

    /// Bloom filter answer for `key` (no disk access)
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    /// Lazy scan over `low <= key <= high`
    pub fn scan_range(self: &Arc<Self>, low: &[u8], high: &[u8]) -> SSTableIterator {
        if low > high || !self.meta.overlaps(low, high) {
            return SSTableIterator::empty(Arc::clone(self));
        }
        let start = self.block_for(low).unwrap_or(0);
        let end = self.index.partition_point(|h| h.first_key.as_slice() <= high);
        SSTableIterator::new(Arc::clone(self), start, end, Some((low.to_vec(), high.to_vec())))
    }

    /// Lazy scan over every entry (for compaction)
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), 0, self.index.len(), None)
    }

    /// Index of the block that would hold `key`
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        self.index
            .partition_point(|h| h.first_key.as_slice() <= key)
            .checked_sub(1)
    }

    /// Read, verify and decode one data block
    pub(super) fn read_block(&self, block: usize) -> Result<Vec<Entry>> {
        let handle = &self.index[block];
        let mut buf = vec![0u8; handle.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut buf)?;
        }

        if crc32fast::hash(&buf) != handle.crc {
            return Err(self.flag_corrupt(format!("block {} checksum mismatch", block)));
        }
        let raw = match self.codec.decompress(&buf) {
            Ok(raw) => raw,
            Err(e) => return Err(self.flag_corrupt(format!("block {}: {}", block, e))),
        };
        decode_block(&raw).ok_or_else(|| self.flag_corrupt(format!("block {} malformed", block)))
    }

    fn flag_corrupt(&self, reason: String) -> LsmError {
        if !self.corrupt.swap(true, Ordering::SeqCst) {
            tracing::error!(
                path = %self.path.display(),
                column = %self.meta.column,
                generation = self.meta.generation,
                %reason,
                "corrupt SSTable, excluding it from reads"
            );
        }
        LsmError::corrupt(&self.path, reason)
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Number of data blocks (sparse index samples)
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// True once a block failed verification
    pub fn is_corrupt(&self) -> bool {
        self.corrupt.load(Ordering::SeqCst)
    }

    /// Delete the file once the last reference is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::SeqCst) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "deleted obsolete SSTable"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to delete obsolete SSTable"),
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("blocks", &self.index.len())
            .finish()
    }
}
