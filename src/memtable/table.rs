//! MemTable implementation
//!
//! Column-partitioned BTreeMap memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::types::{Entry, Sequence};

type Partition = BTreeMap<Vec<u8>, Entry>;

/// In-memory table for recent writes
pub struct MemTable {
    /// column → (key → latest entry)
    data: RwLock<BTreeMap<String, Partition>>,
    /// Distinct (column, key) entries
    entry_count: AtomicUsize,
    /// Approximate payload bytes (keys + values)
    size_bytes: AtomicUsize,
    /// Entry count at which `should_flush` turns true
    flush_threshold: usize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            entry_count: AtomicUsize::new(0),
            size_bytes: AtomicUsize::new(0),
            flush_threshold,
        }
    }

    /// Put a key-value pair
    pub fn put(&self, column: &str, key: Vec<u8>, value: Vec<u8>, sequence: Sequence) {
        self.apply(column, Entry::put(key, value, sequence));
    }

    /// Delete a key (inserts tombstone)
    pub fn delete(&self, column: &str, key: Vec<u8>, sequence: Sequence) {
        self.apply(column, Entry::tombstone(key, sequence));
    }

    /// Insert an entry, keeping the highest sequence per key
    ///
    /// An entry older than the one already stored is ignored.
    pub fn apply(&self, column: &str, entry: Entry) {
        let mut data = self.data.write();
        let partition = data.entry(column.to_string()).or_default();

        let new_size = entry_size(&entry);
        match partition.get_mut(&entry.key) {
            Some(existing) if existing.sequence > entry.sequence => {}
            Some(existing) => {
                let old_size = entry_size(existing);
                *existing = entry;
                self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
                self.size_bytes.fetch_sub(old_size, Ordering::Relaxed);
            }
            None => {
                partition.insert(entry.key.clone(), entry);
                self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get the latest entry for a key, tombstones included
    pub fn get(&self, column: &str, key: &[u8]) -> Option<Entry> {
        self.data.read().get(column)?.get(key).cloned()
    }

    /// Entries of `column` with `low <= key <= high`, in key order
    pub fn scan(&self, column: &str, low: &[u8], high: &[u8]) -> Vec<Entry> {
        if low > high {
            return Vec::new();
        }
        let data = self.data.read();
        let Some(partition) = data.get(column) else {
            return Vec::new();
        };
        partition
            .range::<[u8], _>((Bound::Included(low), Bound::Included(high)))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// All entries of a column in key order (for flush)
    pub fn iter_column(&self, column: &str) -> Vec<Entry> {
        self.data
            .read()
            .get(column)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Columns with at least one entry
    pub fn columns(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of distinct (column, key) entries
    pub fn size(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Approximate payload bytes held
    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True once `size()` has reached the flush threshold
    pub fn should_flush(&self) -> bool {
        self.size() >= self.flush_threshold
    }

    /// Lowest and highest sequence held, if any
    pub fn sequence_range(&self) -> Option<(Sequence, Sequence)> {
        let data = self.data.read();
        data.values()
            .flat_map(|p| p.values())
            .map(|e| e.sequence)
            .fold(None, |acc, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
    }
}

fn entry_size(entry: &Entry) -> usize {
    entry.key.len() + entry.value.as_ref().map_or(0, |v| v.len())
}
