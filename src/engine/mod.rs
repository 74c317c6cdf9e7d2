//! Engine Module
//!
//! The orchestrator that coordinates WAL, MemTables, SSTables and compaction
//! across column namespaces.
//!
//! ## Responsibilities
//! - Assign sequences and make every write durable in the WAL before it is
//!   visible
//! - Freeze and flush the MemTable once it reaches its entry limit
//! - Serve point reads and lazy range scans over an immutable snapshot
//! - Schedule compaction (background worker or inline)
//! - Manage crash recovery on startup
//!
//! ## Write Path
//!
//! ```text
//!   put / delete / write(batch)
//!          │
//!          ▼  write_lock (single writer)
//!   ┌─────────────┐    sync    ┌──────────────┐
//!   │  sequences  │──────────▶ │ WAL segment  │  ← durability boundary
//!   └─────────────┘            └──────┬───────┘
//!                                     ▼
//!                              ┌──────────────┐  should_flush?
//!                              │   active     │──────────────┐
//!                              │  MemTable    │              ▼
//!                              └──────────────┘   freeze + rotate WAL
//!                                                            │
//!                                                            ▼
//!                                                   L0 SSTable per column
//!                                                            │
//!                                                            ▼
//!                                                 compaction (worker/inline)
//! ```

mod batch;
mod worker;

pub use batch::WriteBatch;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{LsmError, Result};
use crate::iterator::{EntryIter, ScanIter};
use crate::memtable::MemTable;
use crate::storage::{compaction, CompactionPicker, CompactionStats, StorageManager};
use crate::types::Sequence;
use crate::wal::{self, RecoveryResult, WalRecovery, WalWriter};

use worker::{Task, Worker};

/// A MemTable that stopped taking writes and is waiting to be flushed
#[derive(Clone)]
struct Frozen {
    table: Arc<MemTable>,
    /// Highest sequence the table holds
    flushed_through: Sequence,
    /// First WAL segment written after the freeze
    next_segment: u64,
}

/// The MemTables visible to readers
struct MemTableSet {
    active: Arc<MemTable>,
    frozen: Option<Frozen>,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/write/flush): Serialized by `write_lock`
///   - Only ONE write operation at a time, across every column
///   - Lock order: write_lock → wal → memtables
///
/// - **Reads** (get/scan_range): never take `write_lock`
///   - Snapshot the MemTables first, then the live SSTable `Version`
///   - A flush publishes its tables before it drops the frozen MemTable, so
///     a reader always sees each entry in at least one of the two
///
/// - **Compaction**: merges without any engine lock, then swaps the
///   `Version` under a brief manifest commit
pub struct LsmTree {
    inner: Arc<Inner>,

    /// Background thread (compaction queue, periodic flush)
    worker: Option<Worker>,
}

pub(crate) struct Inner {
    /// Engine configuration
    config: Config,

    /// Directory holding WAL segments
    wal_dir: PathBuf,

    /// SSTables + manifest (internal locking)
    storage: StorageManager,

    /// Active and frozen MemTables, swapped atomically
    memtables: RwLock<MemTableSet>,

    /// Current WAL segment (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Serializes write operations
    write_lock: Mutex<()>,

    /// One compaction at a time
    compaction_lock: Mutex<()>,

    /// Highest sequence assigned so far
    last_sequence: AtomicU64,

    /// What startup replay found
    recovery: RecoveryResult,

    /// Queue to the background worker, if one runs
    tasks: Option<Sender<Task>>,
}

impl LsmTree {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_DIR: &'static str = "wal";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the directory layout
    /// 2. Load the manifest and open live SSTables
    /// 3. Replay WAL records newer than the last flush into a fresh MemTable
    /// 4. Start a new WAL segment for this session
    /// 5. Start the background worker
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Validate and create directories
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let wal_dir = config.data_dir.join(Self::WAL_DIR);
        fs::create_dir_all(&wal_dir)?;

        // Step 2: Open storage (manifest + SSTables)
        let storage = StorageManager::open(&config)?;
        let flushed_through = storage.last_flushed_sequence();

        // Step 3: Replay the WAL
        let (records, recovery) = WalRecovery::recover(&wal_dir, &config.codec, flushed_through)?;
        let memtable = MemTable::new(config.memtable_entry_limit);
        for record in records {
            let (column, entry) = record.into_entry();
            memtable.apply(&column, entry);
        }

        if recovery.records_recovered > 0 || recovery.truncated {
            tracing::info!(
                recovered = recovery.records_recovered,
                skipped = recovery.records_skipped,
                last_sequence = recovery.last_sequence,
                truncated = recovery.truncated,
                "WAL recovery complete"
            );
        }

        let manifest = storage.manifest();
        let table_max = manifest
            .tables
            .iter()
            .chain(&manifest.quarantined)
            .map(|t| t.max_sequence)
            .max()
            .unwrap_or(0);
        let last_sequence = recovery.last_sequence.max(flushed_through).max(table_max);

        // Step 4: Fresh WAL segment; replayed segments stay until the next flush
        let next_segment = wal::list_segments(&wal_dir)?.last().map_or(1, |id| id + 1);
        let wal = WalWriter::create(&wal_dir, next_segment, Arc::clone(&config.codec))?;

        // Step 5: Background worker
        let spawn_worker = config.background_compaction || config.flush_interval.is_some();
        let channel = spawn_worker.then(Worker::channel);

        let inner = Arc::new(Inner {
            wal_dir,
            storage,
            memtables: RwLock::new(MemTableSet {
                active: Arc::new(memtable),
                frozen: None,
            }),
            wal: Mutex::new(wal),
            write_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            last_sequence: AtomicU64::new(last_sequence),
            recovery,
            tasks: channel.as_ref().map(|(tx, _)| tx.clone()),
            config,
        });

        let worker = match channel {
            Some((tx, rx)) => {
                let interval = inner.config.flush_interval;
                Some(Worker::spawn(Arc::clone(&inner), tx, rx, interval)?)
            }
            None => None,
        };

        if inner.memtables.read().active.should_flush() {
            inner.flush()?;
        }

        tracing::info!(
            data_dir = %inner.config.data_dir.display(),
            last_sequence,
            segment = next_segment,
            "engine opened"
        );

        Ok(Self { inner, worker })
    }

    /// Flush, stop the worker and sync the WAL
    ///
    /// Dropping the engine without `close` is safe: every acknowledged write
    /// is already in the WAL and is replayed on the next open.
    pub fn close(self) -> Result<()> {
        let Self { inner, worker } = self;
        inner.flush()?;

        // Queued compactions finish before the worker sees Shutdown
        if let Some(mut worker) = worker {
            worker.shutdown();
        }

        inner.wal.lock().sync()?;
        tracing::info!(data_dir = %inner.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Store `value` under `(column, key)`. Returns the assigned sequence.
    pub fn put(&self, column: &str, key: &[u8], value: &[u8]) -> Result<Sequence> {
        let mut batch = WriteBatch::new();
        batch.put(column, key, value);
        self.write(batch)
    }

    /// Delete `(column, key)` by writing a tombstone
    pub fn delete(&self, column: &str, key: &[u8]) -> Result<Sequence> {
        let mut batch = WriteBatch::new();
        batch.delete(column, key);
        self.write(batch)
    }

    /// Apply a batch atomically under one contiguous sequence block
    ///
    /// Returns the highest sequence of the batch (or the current sequence for
    /// an empty batch).
    pub fn write(&self, batch: WriteBatch) -> Result<Sequence> {
        if batch.is_empty() {
            return Ok(self.last_sequence());
        }
        self.inner.write(batch)
    }

    /// Put many `(column, key, value)` triples with one WAL sync
    pub fn put_batch<I, C, K, V>(&self, entries: I) -> Result<Sequence>
    where
        I: IntoIterator<Item = (C, K, V)>,
        C: AsRef<str>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::new();
        for (column, key, value) in entries {
            batch.put(column.as_ref(), key.as_ref(), value.as_ref());
        }
        self.write(batch)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Point lookup
    ///
    /// Checks the active MemTable, then the frozen one, then live SSTables
    /// newest to oldest. The first hit decides; a tombstone means absent.
    pub fn get(&self, column: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (active, frozen) = self.inner.memtable_snapshot();

        if let Some(entry) = active.get(column, key) {
            return Ok(entry.value);
        }
        if let Some(entry) = frozen.and_then(|table| table.get(column, key)) {
            return Ok(entry.value);
        }

        let version = self.inner.storage.version();
        for table in version.tables(column) {
            if table.is_corrupt() {
                continue;
            }
            if let Some(entry) = table.get(key)? {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }

    /// Live `(key, value)` pairs with `low <= key <= high`, in key order
    ///
    /// Lazy: SSTable blocks are read as the iterator advances. The snapshot
    /// is fixed at call time; call again to restart.
    pub fn scan_range(&self, column: &str, low: &[u8], high: &[u8]) -> ScanIter {
        let (active, frozen) = self.inner.memtable_snapshot();
        let mut sources: Vec<EntryIter> = Vec::new();

        sources.push(Box::new(active.scan(column, low, high).into_iter().map(Ok::<_, LsmError>)));
        if let Some(table) = frozen {
            sources.push(Box::new(table.scan(column, low, high).into_iter().map(Ok::<_, LsmError>)));
        }

        let version = self.inner.storage.version();
        for table in version.tables(column) {
            if table.is_corrupt() || !table.meta().overlaps(low, high) {
                continue;
            }
            sources.push(Box::new(table.scan_range(low, high)));
        }

        ScanIter::new(sources)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Flush the MemTable to SSTables now (no-op when empty)
    pub fn flush(&self) -> Result<()> {
        self.inner.flush().map(|_| ())
    }

    /// Merge every table of `column` into its deepest level
    ///
    /// Tables flagged corrupt are quarantined first and left out. A table
    /// found corrupt during this merge fails the call; a retry then
    /// compacts around it.
    pub fn compact(&self, column: &str) -> Result<CompactionStats> {
        let _guard = self.inner.compaction_lock.lock();
        self.inner.storage.quarantine_corrupt()?;
        let version = self.inner.storage.version();
        let Some(task) = CompactionPicker::new(&self.inner.config).pick_full(&version, column) else {
            return Ok(CompactionStats::default());
        };
        drop(version);
        compaction::run(&task, &self.inner.storage, &self.inner.config)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Entries held in memory (active + frozen MemTable)
    pub fn memtable_entry_count(&self) -> usize {
        let memtables = self.inner.memtables.read();
        memtables.active.size() + memtables.frozen.as_ref().map_or(0, |f| f.table.size())
    }

    /// Live SSTables of one column
    pub fn sstable_count(&self, column: &str) -> usize {
        self.inner.storage.version().table_count(column)
    }

    /// Live SSTables of one column at one level
    pub fn level_table_count(&self, column: &str, level: u32) -> usize {
        self.inner.storage.version().level(column, level).len()
    }

    /// Live SSTables across every column
    pub fn total_sstable_count(&self) -> usize {
        self.inner.storage.version().total_tables()
    }

    /// Every column with data in memory or on disk
    pub fn columns(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = {
            let memtables = self.inner.memtables.read();
            let mut names: BTreeSet<String> = memtables.active.columns().into_iter().collect();
            if let Some(frozen) = &memtables.frozen {
                names.extend(frozen.table.columns());
            }
            names
        };
        columns.extend(self.inner.storage.version().columns().map(String::from));
        columns.into_iter().collect()
    }

    /// Highest sequence assigned so far
    pub fn last_sequence(&self) -> Sequence {
        self.inner.last_sequence.load(Ordering::SeqCst)
    }

    /// What WAL replay found when this engine opened
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.inner.recovery
    }

    /// SSTables excluded from reads because they failed verification
    pub fn corrupt_segments(&self) -> Vec<PathBuf> {
        self.inner.storage.corrupt_segments()
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl std::fmt::Debug for LsmTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmTree")
            .field("data_dir", &self.inner.config.data_dir)
            .field("last_sequence", &self.last_sequence())
            .field("memtable_entries", &self.memtable_entry_count())
            .field("sstables", &self.total_sstable_count())
            .finish()
    }
}

impl Inner {
    fn write(&self, batch: WriteBatch) -> Result<Sequence> {
        let _guard = self.write_lock.lock();

        // Step 1: Contiguous sequence block
        let first = self.last_sequence.load(Ordering::SeqCst) + 1;
        let records = batch.into_records(first);

        // Step 2: Durable in the WAL (commit point)
        let last = self.wal.lock().append_batch(&records)?;

        // Step 3: Visible in the MemTable
        let should_flush = {
            let memtables = self.memtables.read();
            for record in records {
                let (column, entry) = record.into_entry();
                memtables.active.apply(&column, entry);
            }
            memtables.active.should_flush()
        };
        self.last_sequence.store(last, Ordering::SeqCst);

        // Step 4: Flush check. The write is already durable, so a failed
        // flush is retried on the next trigger instead of failing the write.
        if should_flush {
            match self.flush_locked() {
                Ok(true) => self.schedule_compaction(),
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "memtable flush failed, will retry"),
            }
        }

        Ok(last)
    }

    /// Flush under the write lock. Returns whether anything was written.
    fn flush(&self) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let flushed = self.flush_locked()?;
        if flushed {
            self.schedule_compaction();
        }
        Ok(flushed)
    }

    /// Caller holds `write_lock`
    fn flush_locked(&self) -> Result<bool> {
        // A frozen table left by a failed flush goes first
        let retried = self.flush_frozen()?;

        if self.memtables.read().active.is_empty() {
            return Ok(retried);
        }

        self.freeze()?;
        self.flush_frozen()?;
        Ok(true)
    }

    /// Rotate the WAL and swap in an empty MemTable
    fn freeze(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        let next_segment = wal.segment_id() + 1;
        *wal = WalWriter::create(&self.wal_dir, next_segment, Arc::clone(&self.config.codec))?;

        let mut memtables = self.memtables.write();
        let fresh = Arc::new(MemTable::new(self.config.memtable_entry_limit));
        let table = std::mem::replace(&mut memtables.active, fresh);
        memtables.frozen = Some(Frozen {
            table,
            flushed_through: self.last_sequence.load(Ordering::SeqCst),
            next_segment,
        });
        Ok(())
    }

    /// Write the frozen MemTable out, then drop it and its WAL segments
    fn flush_frozen(&self) -> Result<bool> {
        let Some(frozen) = self.memtables.read().frozen.clone() else {
            return Ok(false);
        };

        self.storage.flush(&frozen.table, frozen.flushed_through)?;
        self.memtables.write().frozen = None;

        let removed = wal::remove_segments_before(&self.wal_dir, frozen.next_segment)?;
        tracing::debug!(
            removed,
            flushed_through = frozen.flushed_through,
            "released flushed WAL segments"
        );
        Ok(true)
    }

    fn memtable_snapshot(&self) -> (Arc<MemTable>, Option<Arc<MemTable>>) {
        let memtables = self.memtables.read();
        (
            Arc::clone(&memtables.active),
            memtables.frozen.as_ref().map(|f| Arc::clone(&f.table)),
        )
    }

    /// Queue (or run inline) compaction for every column over a trigger
    fn schedule_compaction(&self) {
        let version = self.storage.version();
        let picker = CompactionPicker::new(&self.config);
        let columns: Vec<String> = version
            .columns()
            .filter(|column| picker.pick(&version, column).is_some())
            .map(String::from)
            .collect();
        drop(version);

        for column in columns {
            match &self.tasks {
                Some(tx) if self.config.background_compaction => {
                    if tx.send(Task::Compact(column)).is_err() {
                        tracing::warn!("background worker gone, compaction not queued");
                    }
                }
                _ => {
                    if let Err(e) = self.compact_pending(&column) {
                        tracing::error!(%column, error = %e, "inline compaction failed");
                    }
                }
            }
        }
    }

    /// Compact `column` level by level until no trigger fires
    ///
    /// An input found corrupt mid-merge is quarantined on the next pass and
    /// the level is picked again without it.
    pub(crate) fn compact_pending(&self, column: &str) -> Result<()> {
        let _guard = self.compaction_lock.lock();
        let picker = CompactionPicker::new(&self.config);

        let mut passes = 0;
        while passes < self.config.max_levels {
            self.storage.quarantine_corrupt()?;
            let version = self.storage.version();
            let Some(task) = picker.pick(&version, column) else {
                break;
            };
            drop(version);

            match compaction::run(&task, &self.storage, &self.config) {
                Ok(_) => passes += 1,
                Err(LsmError::CorruptSegment { .. }) if task.inputs.iter().any(|t| t.is_corrupt()) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Periodic flush from the worker
    pub(crate) fn flush_if_dirty(&self) -> Result<()> {
        self.flush().map(|_| ())
    }
}
