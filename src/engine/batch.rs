//! Write batches
//!
//! A batch is logged as a single WAL frame with a contiguous block of
//! sequences, so it is replayed all-or-nothing after a crash.

use crate::types::Sequence;
use crate::wal::WalRecord;

#[derive(Debug, Clone)]
struct BatchOp {
    column: String,
    key: Vec<u8>,
    /// `None` = delete
    value: Option<Vec<u8>>,
}

/// Ordered group of puts and deletes applied atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: &str, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(BatchOp {
            column: column.to_string(),
            key: key.to_vec(),
            value: Some(value.to_vec()),
        });
        self
    }

    pub fn delete(&mut self, column: &str, key: &[u8]) -> &mut Self {
        self.ops.push(BatchOp {
            column: column.to_string(),
            key: key.to_vec(),
            value: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Assign `first, first + 1, ...` in batch order; later ops on the same
    /// key therefore win
    pub(crate) fn into_records(self, first: Sequence) -> Vec<WalRecord> {
        self.ops
            .into_iter()
            .zip(first..)
            .map(|(op, sequence)| WalRecord {
                sequence,
                column: op.column,
                key: op.key,
                value: op.value,
            })
            .collect()
    }
}
