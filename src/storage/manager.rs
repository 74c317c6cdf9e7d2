//! Storage Manager
//!
//! Manages the SSTable set and the manifest.
//!
//! ## Responsibilities
//! - Load the manifest and open live SSTables on startup
//! - Remove orphaned files left by interrupted flushes/compactions
//! - Write MemTable flushes as new level-0 tables
//! - Commit compaction results (remove inputs, add outputs) atomically
//! - Publish immutable `Version` snapshots for readers
//! - Quarantine corrupt segments for manual recovery

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{LsmError, Result};
use crate::memtable::MemTable;
use crate::types::Sequence;

use super::manifest::{self, ManifestData};
use super::sstable::{self, BuildOptions, SSTableBuilder, SSTableReader, TableMeta, TMP_EXT};
use super::version::Version;

/// Manages the storage layer
///
/// ## Concurrency:
/// - `version`: swapped under its RwLock; readers clone the `Arc` and let go
/// - `manifest`: Mutex serializing every edit (flush commit, compaction commit)
/// - `next_generation`: Atomic counter (lock-free)
/// - All methods use `&self`
pub struct StorageManager {
    /// Engine root (holds the manifest)
    data_dir: PathBuf,

    /// Directory where SSTables are stored
    sst_dir: PathBuf,

    /// Options for every table written
    build_options: BuildOptions,

    /// Current snapshot of live readers
    version: RwLock<Arc<Version>>,

    /// In-memory copy of the persisted manifest
    manifest: Mutex<ManifestData>,

    /// Next generation for new SSTables (atomic, lock-free)
    next_generation: AtomicU64,
}

impl StorageManager {
    const SSTABLE_DIR: &'static str = "sst";

    /// Open or create storage below `config.data_dir`
    ///
    /// On startup:
    /// 1. Load the manifest (missing = empty engine)
    /// 2. Open a reader for every listed table; corrupt ones are moved to
    ///    quarantine and reported, not fatal
    /// 3. Delete table files the manifest does not reference
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        let sst_dir = data_dir.join(Self::SSTABLE_DIR);
        fs::create_dir_all(&sst_dir)?;

        let mut manifest = manifest::load(&data_dir)?;

        let mut readers = Vec::new();
        let mut corrupt = Vec::new();
        for meta in &manifest.tables {
            let path = sstable::table_path(&sst_dir, meta.generation);
            match SSTableReader::open(&path, &config.codec) {
                Ok(reader) => readers.push(Arc::new(reader)),
                Err(LsmError::CorruptSegment { path, reason }) => {
                    tracing::error!(
                        path = %path.display(),
                        column = %meta.column,
                        %reason,
                        "corrupt SSTable excluded from reads; manual recovery required"
                    );
                    corrupt.push(meta.generation);
                }
                Err(e) => return Err(e),
            }
        }

        if !corrupt.is_empty() {
            manifest.quarantine(&corrupt);
            manifest::store(&data_dir, &manifest)?;
        }

        Self::remove_orphans(&sst_dir, &manifest)?;

        let max_listed = manifest
            .tables
            .iter()
            .chain(&manifest.quarantined)
            .map(|t| t.generation + 1)
            .max()
            .unwrap_or(1);
        let next_generation = manifest.next_generation.max(max_listed).max(1);

        tracing::info!(
            tables = readers.len(),
            quarantined = manifest.quarantined.len(),
            last_flushed_sequence = manifest.last_flushed_sequence,
            "storage opened"
        );

        Ok(Self {
            data_dir,
            sst_dir,
            build_options: BuildOptions {
                block_size: config.block_size,
                bloom_false_positive_rate: config.bloom_false_positive_rate,
                codec: Arc::clone(&config.codec),
            },
            version: RwLock::new(Arc::new(Version::new(readers))),
            manifest: Mutex::new(manifest),
            next_generation: AtomicU64::new(next_generation),
        })
    }

    /// Current snapshot of live tables
    pub fn version(&self) -> Arc<Version> {
        Arc::clone(&self.version.read())
    }

    /// Copy of the persisted manifest
    pub fn manifest(&self) -> ManifestData {
        self.manifest.lock().clone()
    }

    /// Highest sequence captured by a completed flush
    pub fn last_flushed_sequence(&self) -> Sequence {
        self.manifest.lock().last_flushed_sequence
    }

    /// Reserve a generation for a new table
    pub fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    pub fn build_options(&self) -> &BuildOptions {
        &self.build_options
    }

    /// Start a new table in the SSTable directory
    pub fn new_table(&self, column: &str, level: u32, expected_entries: usize) -> Result<SSTableBuilder> {
        let generation = self.allocate_generation();
        SSTableBuilder::new(
            &sstable::table_path(&self.sst_dir, generation),
            column,
            generation,
            level,
            expected_entries,
            self.build_options.clone(),
        )
    }

    /// Flush a frozen MemTable to level-0 tables, one per column
    ///
    /// The tables become visible to readers only after the manifest naming
    /// them (and `flushed_through`) is durable.
    pub fn flush(&self, memtable: &MemTable, flushed_through: Sequence) -> Result<Vec<TableMeta>> {
        let mut written: Vec<TableMeta> = Vec::new();

        let result = (|| -> Result<()> {
            for column in memtable.columns() {
                let entries = memtable.iter_column(&column);
                if entries.is_empty() {
                    continue;
                }
                let mut builder = self.new_table(&column, 0, entries.len())?;
                for entry in &entries {
                    if let Err(e) = builder.add(entry) {
                        builder.abandon();
                        return Err(e);
                    }
                }
                written.push(builder.finish()?);
            }
            Ok(())
        })();

        if let Err(e) = result {
            self.discard(&written);
            return Err(e);
        }

        let readers = match self.open_readers(&written) {
            Ok(readers) => readers,
            Err(e) => {
                self.discard(&written);
                return Err(e);
            }
        };

        if let Err(e) = self.commit(&[], &readers, Some(flushed_through)) {
            drop(readers);
            self.discard(&written);
            return Err(e);
        }

        tracing::info!(
            tables = written.len(),
            entries = written.iter().map(|t| t.entry_count).sum::<u64>(),
            flushed_through,
            "flushed memtable"
        );
        Ok(written)
    }

    /// Replace compaction inputs with outputs in one manifest edit
    ///
    /// Inputs are marked obsolete; their files are deleted once no reader
    /// holds them any more.
    pub fn commit_compaction(&self, inputs: &[Arc<SSTableReader>], outputs: &[TableMeta]) -> Result<()> {
        let readers = match self.open_readers(outputs) {
            Ok(readers) => readers,
            Err(e) => {
                self.discard(outputs);
                return Err(e);
            }
        };

        if let Err(e) = self.commit(inputs, &readers, None) {
            drop(readers);
            self.discard(outputs);
            return Err(e);
        }

        for input in inputs {
            input.mark_obsolete();
        }
        Ok(())
    }

    /// Apply one edit: persist the manifest, then publish the new version
    fn commit(
        &self,
        removed: &[Arc<SSTableReader>],
        added: &[Arc<SSTableReader>],
        flushed_through: Option<Sequence>,
    ) -> Result<()> {
        let mut manifest = self.manifest.lock();

        let removed_gens: Vec<u64> = removed.iter().map(|t| t.generation()).collect();
        if let Some(missing) = removed_gens.iter().find(|g| !manifest.contains(**g)) {
            return Err(LsmError::Storage(format!(
                "compaction input generation {} is no longer live",
                missing
            )));
        }

        let mut next = manifest.clone();
        next.tables.retain(|t| !removed_gens.contains(&t.generation));
        next.tables.extend(added.iter().map(|t| t.meta().clone()));
        next.next_generation = self.next_generation.load(Ordering::SeqCst);
        if let Some(seq) = flushed_through {
            next.last_flushed_sequence = next.last_flushed_sequence.max(seq);
        }

        // Step 1: durable manifest
        manifest::store(&self.data_dir, &next)?;
        *manifest = next;

        // Step 2: publish to readers
        let mut version = self.version.write();
        let updated = version.with_replaced(&removed_gens, added);
        *version = Arc::new(updated);
        Ok(())
    }

    /// Move tables flagged corrupt by reads out of the live set
    ///
    /// A quarantined table stays on disk and in the manifest, outside every
    /// level. Returns how many tables were moved.
    pub fn quarantine_corrupt(&self) -> Result<usize> {
        let mut manifest = self.manifest.lock();
        let flagged: Vec<u64> = self
            .version()
            .all_tables()
            .filter(|t| t.is_corrupt())
            .map(|t| t.generation())
            .collect();
        if flagged.is_empty() {
            return Ok(0);
        }

        let mut next = manifest.clone();
        next.quarantine(&flagged);
        manifest::store(&self.data_dir, &next)?;
        *manifest = next;

        let mut version = self.version.write();
        let updated = version.with_replaced(&flagged, &[]);
        *version = Arc::new(updated);

        tracing::warn!(?flagged, "quarantined corrupt SSTables");
        Ok(flagged.len())
    }

    /// Paths of tables known to be corrupt (quarantined or flagged by reads)
    pub fn corrupt_segments(&self) -> Vec<PathBuf> {
        let mut paths: BTreeSet<PathBuf> = self
            .manifest
            .lock()
            .quarantined
            .iter()
            .map(|t| sstable::table_path(&self.sst_dir, t.generation))
            .collect();
        paths.extend(
            self.version()
                .all_tables()
                .filter(|t| t.is_corrupt())
                .map(|t| t.path().to_path_buf()),
        );
        paths.into_iter().collect()
    }

    /// Oldest sequence held by tables of `column` outside `inputs`
    ///
    /// Counts quarantined tables too: they still hold data a tombstone may
    /// need to shadow after manual recovery.
    pub fn oldest_sequence_outside(&self, column: &str, inputs: &[Arc<SSTableReader>]) -> Option<Sequence> {
        let input_gens: HashSet<u64> = inputs.iter().map(|t| t.generation()).collect();
        let manifest = self.manifest.lock();
        manifest
            .column_tables(column)
            .chain(manifest.quarantined.iter().filter(|t| t.column == column))
            .filter(|t| !input_gens.contains(&t.generation))
            .map(|t| t.min_sequence)
            .min()
    }

    pub fn sst_dir(&self) -> &Path {
        &self.sst_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn open_readers(&self, metas: &[TableMeta]) -> Result<Vec<Arc<SSTableReader>>> {
        metas
            .iter()
            .map(|meta| {
                let path = sstable::table_path(&self.sst_dir, meta.generation);
                SSTableReader::open(&path, &self.build_options.codec).map(Arc::new)
            })
            .collect()
    }

    /// Delete tables that were written but never committed
    pub(crate) fn discard(&self, metas: &[TableMeta]) {
        for meta in metas {
            let path = sstable::table_path(&self.sst_dir, meta.generation);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove uncommitted SSTable");
            }
        }
    }

    /// Remove `.sst` files not in the manifest and leftover `.tmp` files
    fn remove_orphans(sst_dir: &Path, manifest: &ManifestData) -> Result<()> {
        for entry in fs::read_dir(sst_dir)? {
            let path = entry?.path();
            let orphan = match sstable::parse_generation(&path) {
                Some(generation) => !manifest.references(generation),
                None => path.extension().and_then(|e| e.to_str()) == Some(TMP_EXT),
            };
            if orphan {
                tracing::warn!(path = %path.display(), "removing orphaned table file");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
