//! Core data model shared by every layer.

use serde::{Deserialize, Serialize};

/// Monotonic write counter; the highest sequence for a key wins
pub type Sequence = u64;

/// A single versioned mutation of one key.
///
/// `value == None` is a tombstone. The column is implied by the container
/// (MemTable partition, SSTable metadata) except in the WAL, where records
/// carry it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub sequence: Sequence,
}

impl Entry {
    pub fn put(key: Vec<u8>, value: Vec<u8>, sequence: Sequence) -> Self {
        Self {
            key,
            value: Some(value),
            sequence,
        }
    }

    pub fn tombstone(key: Vec<u8>, sequence: Sequence) -> Self {
        Self {
            key,
            value: None,
            sequence,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Inclusive-inclusive key range test used by every scan in the crate.
#[inline]
pub fn in_range(key: &[u8], low: &[u8], high: &[u8]) -> bool {
    key >= low && key <= high
}
