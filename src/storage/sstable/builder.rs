//! SSTable Builder
//!
//! Streams sorted entries into a new SSTable file, building the sparse index
//! and bloom filter on the way.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;

use crate::bloom::BloomFilter;
use crate::codec::Codec;
use crate::error::{LsmError, Result};
use crate::types::Entry;
use crate::wal::sync_dir;

use super::{encode_entry, encode_index, BlockHandle, Footer, TableMeta, TMP_EXT};

/// Knobs shared by flush and compaction when writing tables
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Uncompressed bytes per data block
    pub block_size: usize,
    /// Bloom filter false-positive target
    pub bloom_false_positive_rate: f64,
    /// Codec for data blocks
    pub codec: Arc<dyn Codec>,
}

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    /// Final file path (visible only after `finish`)
    path: PathBuf,
    /// Temporary path written while building
    tmp_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    options: BuildOptions,
    /// Current uncompressed block
    block: BytesMut,
    /// First key of the current block
    block_first_key: Option<Vec<u8>>,
    /// Current write position
    offset: u64,
    /// Sparse index: one handle per finished block
    index: Vec<BlockHandle>,
    bloom: BloomFilter,
    /// Metadata accumulated while streaming
    meta: TableMeta,
    /// Last key added (for order validation)
    last_key: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    ///
    /// `expected_entries` sizes the bloom filter; an overestimate only costs
    /// space. Call `add()` in strictly ascending key order, then `finish()`.
    pub fn new(
        path: &Path,
        column: &str,
        generation: u64,
        level: u32,
        expected_entries: usize,
        options: BuildOptions,
    ) -> Result<Self> {
        let tmp_path = path.with_extension(TMP_EXT);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let bloom = BloomFilter::new(expected_entries, options.bloom_false_positive_rate);

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: BufWriter::new(file),
            block: BytesMut::with_capacity(options.block_size + 256),
            options,
            block_first_key: None,
            offset: 0,
            index: Vec::new(),
            bloom,
            meta: TableMeta {
                column: column.to_string(),
                generation,
                level,
                min_key: Vec::new(),
                max_key: Vec::new(),
                entry_count: 0,
                min_sequence: u64::MAX,
                max_sequence: 0,
                file_size: 0,
            },
            last_key: None,
        })
    }

    /// Add an entry (keys must be strictly ascending)
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(LsmError::Storage(format!(
                    "SSTable keys out of order: {:?} after {:?}",
                    entry.key, last
                )));
            }
        }

        if self.meta.entry_count == 0 {
            self.meta.min_key = entry.key.clone();
        }
        self.meta.max_key = entry.key.clone();
        self.meta.entry_count += 1;
        self.meta.min_sequence = self.meta.min_sequence.min(entry.sequence);
        self.meta.max_sequence = self.meta.max_sequence.max(entry.sequence);

        self.bloom.add(&entry.key);
        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
        }
        encode_entry(&mut self.block, entry);
        self.last_key = Some(entry.key.clone());

        if self.block.len() >= self.options.block_size {
            self.finish_block()?;
        }
        Ok(())
    }

    /// Bytes written so far plus the pending block (for output splitting)
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block.len() as u64
    }

    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Compress and write the pending block, recording it in the index
    fn finish_block(&mut self) -> Result<()> {
        let Some(first_key) = self.block_first_key.take() else {
            return Ok(());
        };

        let compressed = self.options.codec.compress(&self.block)?;
        self.block.clear();

        let handle = BlockHandle {
            first_key,
            offset: self.offset,
            len: compressed.len() as u32,
            crc: crc32fast::hash(&compressed),
        };
        self.writer.write_all(&compressed)?;
        self.offset += compressed.len() as u64;
        self.index.push(handle);
        Ok(())
    }

    /// Finish building: write index, filter, meta and footer, then publish
    /// the file under its final name
    pub fn finish(mut self) -> Result<TableMeta> {
        self.finish_block()?;
        if self.meta.entry_count == 0 {
            self.meta.min_sequence = 0;
        }

        let index = encode_index(&self.index);
        let filter = self.bloom.encode();
        let meta = bincode::serialize(&self.meta)?;

        let mut tail_hasher = crc32fast::Hasher::new();
        tail_hasher.update(&index);
        tail_hasher.update(&filter);
        tail_hasher.update(&meta);

        let index_offset = self.offset;
        let filter_offset = index_offset + index.len() as u64;
        let meta_offset = filter_offset + filter.len() as u64;
        let footer = Footer {
            index_offset,
            index_len: index.len() as u64,
            filter_offset,
            filter_len: filter.len() as u64,
            meta_offset,
            meta_len: meta.len() as u64,
            tail_crc: tail_hasher.finalize(),
            codec_id: self.options.codec.id(),
        };

        self.writer.write_all(&index)?;
        self.writer.write_all(&filter)?;
        self.writer.write_all(&meta)?;
        self.writer.write_all(&footer.encode())?;
        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            LsmError::Storage(format!("Failed to flush SSTable: {}", e))
        })?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();
        drop(file);

        // Publish atomically
        fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        self.meta.file_size = file_size;
        tracing::debug!(
            column = %self.meta.column,
            generation = self.meta.generation,
            level = self.meta.level,
            entries = self.meta.entry_count,
            bytes = file_size,
            "wrote SSTable"
        );
        Ok(self.meta)
    }

    /// Discard a partially built table
    pub fn abandon(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.writer);
        if let Err(e) = fs::remove_file(&tmp_path) {
            tracing::warn!(path = %tmp_path.display(), error = %e, "failed to remove abandoned SSTable");
        }
    }
}
