//! Compaction
//!
//! Bounds the number of SSTables a read has to consult and reclaims space
//! held by overwritten and deleted keys.
//!
//! ## Levels
//! - L0: flush output, tables may overlap
//! - L1..: each level is one non-overlapping sorted run
//!
//! ## Triggers (per column)
//! - L0 table count >= `level0_file_trigger`
//! - Level N (N >= 1) bytes > `level_base_bytes * multiplier^(N-1)`
//!
//! ## Algorithm
//! Compacting level N merges all of its tables with the level N+1 tables
//! overlapping them. The merge keeps the highest-sequence version of each
//! key. A tombstone is dropped only when every live table of the column
//! outside the inputs holds strictly newer sequences; otherwise it is
//! carried forward so older data cannot resurface. Output is cut into files
//! of `target_file_size` and committed in one manifest edit.
//!
//! Tables flagged corrupt are never picked as inputs. The engine moves them
//! into quarantine before picking so the level structure stays consistent.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::iterator::{EntryIter, MergeIterator};
use crate::types::{Entry, Sequence};

use super::manager::StorageManager;
use super::sstable::{SSTableBuilder, SSTableReader, TableMeta};
use super::version::Version;

/// A selected compaction
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub column: String,
    /// Level whose trigger fired
    pub source_level: u32,
    /// Level receiving the output
    pub target_level: u32,
    /// Tables to merge (their union is replaced)
    pub inputs: Vec<Arc<SSTableReader>>,
}

/// Outcome of a finished compaction
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    pub input_tables: usize,
    pub output_tables: usize,
    pub entries_read: u64,
    pub entries_written: u64,
    pub tombstones_dropped: u64,
}

/// Chooses what to compact
pub struct CompactionPicker<'a> {
    config: &'a Config,
}

impl<'a> CompactionPicker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// First level of `column` over its trigger, if any
    pub fn pick(&self, version: &Version, column: &str) -> Option<CompactionTask> {
        let last_level = self.config.max_levels - 1;

        if live(version.level(column, 0)).len() >= self.config.level0_file_trigger {
            return Some(self.task_for_level(version, column, 0));
        }

        (1..last_level)
            .find(|&level| version.level_bytes(column, level) > self.config.level_budget(level))
            .map(|level| self.task_for_level(version, column, level))
    }

    /// Every table of `column` into its deepest occupied level (at least 1)
    pub fn pick_full(&self, version: &Version, column: &str) -> Option<CompactionTask> {
        let inputs = live(version.tables(column).to_vec());
        if inputs.is_empty() {
            return None;
        }
        let deepest = inputs.iter().map(|t| t.meta().level).max().unwrap_or(0);
        let target_level = deepest.clamp(1, self.config.max_levels - 1);
        Some(CompactionTask {
            column: column.to_string(),
            source_level: 0,
            target_level,
            inputs,
        })
    }

    fn task_for_level(&self, version: &Version, column: &str, level: u32) -> CompactionTask {
        let mut inputs = live(version.level(column, level));
        let low = inputs.iter().map(|t| t.meta().min_key.clone()).min().unwrap_or_default();
        let high = inputs.iter().map(|t| t.meta().max_key.clone()).max().unwrap_or_default();

        inputs.extend(
            live(version.level(column, level + 1))
                .into_iter()
                .filter(|t| t.meta().overlaps(&low, &high)),
        );

        CompactionTask {
            column: column.to_string(),
            source_level: level,
            target_level: level + 1,
            inputs,
        }
    }
}

/// Tables still fit to be read
fn live(tables: Vec<Arc<SSTableReader>>) -> Vec<Arc<SSTableReader>> {
    tables.into_iter().filter(|t| !t.is_corrupt()).collect()
}

/// Merge the task's inputs into new tables and commit them
///
/// On any failure before the commit, partial outputs are deleted and the
/// manifest is untouched, so the compaction can simply be retried.
pub fn run(task: &CompactionTask, storage: &StorageManager, config: &Config) -> Result<CompactionStats> {
    let gc_floor = storage.oldest_sequence_outside(&task.column, &task.inputs);
    let expected: u64 = task.inputs.iter().map(|t| t.entry_count()).sum();

    let sources: Vec<EntryIter> = task
        .inputs
        .iter()
        .map(|t| Box::new(t.iter()) as EntryIter)
        .collect();

    let mut stats = CompactionStats {
        input_tables: task.inputs.len(),
        ..Default::default()
    };
    let mut outputs: Vec<TableMeta> = Vec::new();
    let mut builder: Option<SSTableBuilder> = None;

    let merged = (|| -> Result<()> {
        for entry in MergeIterator::new(sources) {
            let entry = entry?;
            stats.entries_read += 1;

            if tombstone_collectable(&entry, gc_floor) {
                stats.tombstones_dropped += 1;
                continue;
            }

            if builder.is_none() {
                builder = Some(storage.new_table(&task.column, task.target_level, expected as usize)?);
            }
            if let Some(current) = builder.as_mut() {
                current.add(&entry)?;
                stats.entries_written += 1;
                if current.estimated_size() < config.target_file_size {
                    continue;
                }
            }
            if let Some(full) = builder.take() {
                outputs.push(full.finish()?);
            }
        }
        if let Some(last) = builder.take() {
            outputs.push(last.finish()?);
        }
        Ok(())
    })();

    if let Err(e) = merged {
        if let Some(partial) = builder.take() {
            partial.abandon();
        }
        storage.discard(&outputs);
        tracing::warn!(column = %task.column, error = %e, "compaction failed, inputs left untouched");
        return Err(e);
    }

    storage.commit_compaction(&task.inputs, &outputs)?;
    stats.output_tables = outputs.len();

    tracing::info!(
        column = %task.column,
        from_level = task.source_level,
        to_level = task.target_level,
        inputs = stats.input_tables,
        outputs = stats.output_tables,
        entries_read = stats.entries_read,
        entries_written = stats.entries_written,
        tombstones_dropped = stats.tombstones_dropped,
        "compaction committed"
    );
    Ok(stats)
}

/// A tombstone can go once nothing older than it survives outside the inputs
fn tombstone_collectable(entry: &Entry, gc_floor: Option<Sequence>) -> bool {
    entry.is_tombstone() && gc_floor.map_or(true, |floor| entry.sequence < floor)
}
