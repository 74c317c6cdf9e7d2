//! Version
//!
//! An immutable snapshot of the live SSTable readers, per column. Flush and
//! compaction never modify a published version; they build a new one and
//! swap it in, so a reader holding a version always sees a consistent set.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::sstable::SSTableReader;

#[derive(Debug, Clone, Default)]
pub struct Version {
    /// column → tables in read order (level asc, generation desc)
    columns: BTreeMap<String, Vec<Arc<SSTableReader>>>,
}

impl Version {
    pub fn new(tables: impl IntoIterator<Item = Arc<SSTableReader>>) -> Self {
        let mut version = Self::default();
        for table in tables {
            version
                .columns
                .entry(table.meta().column.clone())
                .or_default()
                .push(table);
        }
        for tables in version.columns.values_mut() {
            sort_read_order(tables);
        }
        version
    }

    /// Tables of a column, newest data first
    pub fn tables(&self, column: &str) -> &[Arc<SSTableReader>] {
        self.columns.get(column).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tables of a column at one level
    pub fn level(&self, column: &str, level: u32) -> Vec<Arc<SSTableReader>> {
        self.tables(column)
            .iter()
            .filter(|t| t.meta().level == level)
            .cloned()
            .collect()
    }

    /// Total bytes of a column's level, corrupt tables not counted
    pub fn level_bytes(&self, column: &str, level: u32) -> u64 {
        self.tables(column)
            .iter()
            .filter(|t| t.meta().level == level && !t.is_corrupt())
            .map(|t| t.meta().file_size)
            .sum()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn table_count(&self, column: &str) -> usize {
        self.tables(column).len()
    }

    pub fn total_tables(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    /// All tables across columns
    pub fn all_tables(&self) -> impl Iterator<Item = &Arc<SSTableReader>> {
        self.columns.values().flatten()
    }

    /// New version without the `removed` generations and with `added` tables
    pub fn with_replaced(&self, removed: &[u64], added: &[Arc<SSTableReader>]) -> Self {
        let mut columns = self.columns.clone();
        for tables in columns.values_mut() {
            tables.retain(|t| !removed.contains(&t.generation()));
        }
        for table in added {
            columns
                .entry(table.meta().column.clone())
                .or_default()
                .push(Arc::clone(table));
        }
        columns.retain(|_, tables| !tables.is_empty());
        for tables in columns.values_mut() {
            sort_read_order(tables);
        }
        Self { columns }
    }
}

/// Level ascending, generation descending: a key at level N is always newer
/// than the same key at level N+1, and within level 0 later flushes win.
fn sort_read_order(tables: &mut [Arc<SSTableReader>]) {
    tables.sort_by(|a, b| {
        a.meta()
            .level
            .cmp(&b.meta().level)
            .then(b.generation().cmp(&a.generation()))
    });
}
