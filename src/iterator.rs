//! Merging iterators
//!
//! N-way merge over sorted entry streams (MemTables, SSTables) using a
//! min-heap keyed by `(key, -sequence)`. For each distinct key the
//! highest-sequence version surfaces first and every older version is
//! skipped, which is the resolution rule for both reads and compaction.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::{LsmError, Result};
use crate::types::Entry;

/// A sorted stream of entries from one source
pub type EntryIter = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Heap item: the current head of one source
#[derive(Debug)]
struct HeapItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // key ascending, then sequence descending, then earlier source first
        self.entry
            .key
            .cmp(&other.entry.key)
            .then(other.entry.sequence.cmp(&self.entry.sequence))
            .then(self.source.cmp(&other.source))
    }
}

/// Yields the newest version of every key across all sources, tombstones
/// included, in key order
pub struct MergeIterator {
    heap: BinaryHeap<Reverse<HeapItem>>,
    sources: Vec<EntryIter>,
    last_key: Option<Vec<u8>>,
    /// First error raised by a source; ends the merge
    pending_error: Option<LsmError>,
    finished: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<EntryIter>) -> Self {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            last_key: None,
            pending_error: None,
            finished: false,
        };
        for source in 0..iter.sources.len() {
            iter.refill(source);
        }
        iter
    }

    /// Pull the next entry of `source` into the heap
    fn refill(&mut self, source: usize) {
        if self.pending_error.is_some() {
            return;
        }
        match self.sources[source].next() {
            Some(Ok(entry)) => self.heap.push(Reverse(HeapItem { entry, source })),
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(e) = self.pending_error.take() {
                self.finished = true;
                return Some(Err(e));
            }

            let Some(Reverse(item)) = self.heap.pop() else {
                self.finished = true;
                return None;
            };
            self.refill(item.source);

            // Older versions of a key already emitted
            if self.last_key.as_deref() == Some(item.entry.key.as_slice()) {
                continue;
            }
            self.last_key = Some(item.entry.key.clone());
            return Some(Ok(item.entry));
        }
    }
}

/// User-facing range scan: live `(key, value)` pairs, tombstones filtered out
pub struct ScanIter {
    inner: MergeIterator,
}

impl ScanIter {
    pub(crate) fn new(sources: Vec<EntryIter>) -> Self {
        Self {
            inner: MergeIterator::new(sources),
        }
    }
}

impl Iterator for ScanIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(Entry {
                    key,
                    value: Some(value),
                    ..
                }) => return Some(Ok((key, value))),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
