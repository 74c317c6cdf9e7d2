//! SSTable Iterator
//!
//! Lazy iteration over a table's entries in key order, one block at a time.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{in_range, Entry};

use super::SSTableReader;

/// Iterator over SSTable entries in sorted key order
///
/// Holds its table alive, so a compaction that retires the table does not
/// disturb an in-flight scan.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    /// Next block to load
    next_block: usize,
    /// One past the last block that may hold keys in range
    end_block: usize,
    /// Decoded entries of the current block
    current: std::vec::IntoIter<Entry>,
    /// Inclusive `(low, high)`; `None` for a full scan
    bounds: Option<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl SSTableIterator {
    pub(super) fn new(
        table: Arc<SSTableReader>,
        start_block: usize,
        end_block: usize,
        bounds: Option<(Vec<u8>, Vec<u8>)>,
    ) -> Self {
        Self {
            table,
            next_block: start_block,
            end_block,
            current: Vec::new().into_iter(),
            bounds,
            done: false,
        }
    }

    pub(super) fn empty(table: Arc<SSTableReader>) -> Self {
        let mut iter = Self::new(table, 0, 0, None);
        iter.done = true;
        iter
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Some(entry) = self.current.next() {
                if let Some((low, high)) = &self.bounds {
                    if entry.key > *high {
                        self.done = true;
                        return None;
                    }
                    if !in_range(&entry.key, low, high) {
                        continue;
                    }
                }
                return Some(Ok(entry));
            }

            if self.next_block >= self.end_block {
                self.done = true;
                return None;
            }

            match self.table.read_block(self.next_block) {
                Ok(entries) => {
                    self.current = entries.into_iter();
                    self.next_block += 1;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
