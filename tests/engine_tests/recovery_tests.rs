//! Tests for crash recovery
//!
//! Dropping an `LsmTree` without `close` simulates a crash: nothing beyond
//! the synced WAL and committed SSTables survives.
//!
//! These tests verify:
//! - WAL replay reconstructs the pre-crash state
//! - Records already flushed are not replayed
//! - Torn WAL tails are truncated, never fatal
//! - Corrupt SSTables are excluded and reported

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use columnlsm::wal;
use columnlsm::LsmError;
use tempfile::TempDir;

use super::{config, open, scan};

fn latest_segment(dir: &Path) -> PathBuf {
    let wal_dir = dir.join("wal");
    let id = *wal::list_segments(&wal_dir).unwrap().last().unwrap();
    wal::segment_path(&wal_dir, id)
}

fn sstable_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir.join("sst"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("sst"))
        .collect();
    files.sort();
    files
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_crash_before_flush_replays_wal() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"a", b"1").unwrap();
        tree.put("c1", b"b", b"2").unwrap();
        tree.put("c1", b"a", b"3").unwrap();
        tree.delete("c1", b"b").unwrap();
        tree.put("c2", b"x", b"y").unwrap();
        // dropped without close
    }

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.get("c1", b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(tree.get("c1", b"b").unwrap(), None);
    assert_eq!(tree.get("c2", b"x").unwrap(), Some(b"y".to_vec()));
    assert_eq!(tree.recovery_result().records_recovered, 5);
    assert!(!tree.recovery_result().truncated);
}

#[test]
fn test_sequences_continue_after_reopen() {
    let temp = TempDir::new().unwrap();
    let last = {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"k", b"old").unwrap()
    };

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.last_sequence(), last);
    assert!(tree.put("c1", b"k", b"new").unwrap() > last);
    assert_eq!(tree.get("c1", b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_sequences_continue_after_flush_and_reopen() {
    let temp = TempDir::new().unwrap();
    let last = {
        let tree = open(temp.path(), 1_000);
        let seq = tree.put("c1", b"k", b"old").unwrap();
        tree.flush().unwrap();
        seq
    };

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.last_sequence(), last);
    tree.put("c1", b"k", b"new").unwrap();
    tree.flush().unwrap();
    assert_eq!(tree.get("c1", b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_flushed_records_not_replayed() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        for i in 0..5 {
            tree.put("c1", format!("k{}", i).as_bytes(), b"flushed").unwrap();
        }
        tree.flush().unwrap();
        tree.put("c1", b"k0", b"after").unwrap();
        tree.put("c1", b"k9", b"after").unwrap();
    }

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.recovery_result().records_recovered, 2);
    assert_eq!(tree.memtable_entry_count(), 2);
    assert_eq!(tree.get("c1", b"k0").unwrap(), Some(b"after".to_vec()));
    assert_eq!(tree.get("c1", b"k3").unwrap(), Some(b"flushed".to_vec()));
}

#[test]
fn test_close_then_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put_batch(vec![("c1", "a", "1"), ("c1", "b", "2")]).unwrap();
        tree.close().unwrap();
    }

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.memtable_entry_count(), 0);
    assert_eq!(tree.recovery_result().records_recovered, 0);
    assert_eq!(scan(&tree, "c1", b"a", b"z").len(), 2);
}

#[test]
fn test_replay_over_limit_flushes_on_open() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        for i in 0..8 {
            tree.put("c1", format!("k{}", i).as_bytes(), b"v").unwrap();
        }
    }

    let tree = open(temp.path(), 5);
    assert_eq!(tree.memtable_entry_count(), 0);
    assert_eq!(tree.sstable_count("c1"), 1);
    assert_eq!(scan(&tree, "c1", b"k0", b"k9").len(), 8);
}

// =============================================================================
// Torn WAL
// =============================================================================

#[test]
fn test_torn_wal_tail_truncated() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"a", b"1").unwrap();
        tree.put("c1", b"b", b"2").unwrap();
    }
    let segment = latest_segment(temp.path());
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&[0x55; 13]).unwrap();
    drop(file);

    let tree = open(temp.path(), 1_000);
    assert!(tree.recovery_result().truncated);
    assert_eq!(tree.get("c1", b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(tree.get("c1", b"b").unwrap(), Some(b"2".to_vec()));

    // New writes survive another crash
    tree.put("c1", b"c", b"3").unwrap();
    drop(tree);
    let tree = open(temp.path(), 1_000);
    assert_eq!(scan(&tree, "c1", b"a", b"z").len(), 3);
}

#[test]
fn test_torn_batch_applied_not_at_all() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"before", b"ok").unwrap();
        tree.put_batch(vec![("c1", "b1", "x"), ("c1", "b2", "y"), ("c1", "b3", "z")])
            .unwrap();
    }
    let segment = latest_segment(temp.path());
    let len = fs::metadata(&segment).unwrap().len();
    let file = OpenOptions::new().write(true).open(&segment).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let tree = open(temp.path(), 1_000);
    assert!(tree.recovery_result().truncated);
    assert_eq!(tree.get("c1", b"before").unwrap(), Some(b"ok".to_vec()));
    for key in ["b1", "b2", "b3"] {
        assert_eq!(tree.get("c1", key.as_bytes()).unwrap(), None);
    }
}

// =============================================================================
// Corrupt Storage
// =============================================================================

#[test]
fn test_corrupt_sstable_footer_reported() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("bad", b"k", b"v").unwrap();
        tree.put("good", b"k", b"v").unwrap();
        tree.close().unwrap();
    }
    let files = sstable_files(temp.path());
    assert_eq!(files.len(), 2);
    let victim = files
        .iter()
        .find(|p| {
            columnlsm::storage::SSTableReader::open(p, &config(temp.path(), 1).codec)
                .unwrap()
                .meta()
                .column
                == "bad"
        })
        .unwrap()
        .clone();
    let mut bytes = fs::read(&victim).unwrap();
    let len = bytes.len();
    bytes[len - 2] ^= 0xff;
    fs::write(&victim, &bytes).unwrap();

    let tree = open(temp.path(), 1_000);
    assert_eq!(tree.corrupt_segments(), vec![victim]);
    assert_eq!(tree.get("bad", b"k").unwrap(), None);
    assert_eq!(tree.get("good", b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_corrupt_block_reported_on_read() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"k", b"value").unwrap();
        tree.close().unwrap();
    }
    let victim = sstable_files(temp.path()).remove(0);
    let mut bytes = fs::read(&victim).unwrap();
    bytes[2] ^= 0xff;
    fs::write(&victim, &bytes).unwrap();

    let tree = open(temp.path(), 1_000);
    assert!(tree.corrupt_segments().is_empty());
    assert!(matches!(tree.get("c1", b"k"), Err(LsmError::CorruptSegment { .. })));
    assert_eq!(tree.corrupt_segments(), vec![victim]);

    // Flagged table is skipped from now on
    assert_eq!(tree.get("c1", b"k").unwrap(), None);
}

#[test]
fn test_corrupt_manifest_fails_open() {
    let temp = TempDir::new().unwrap();
    {
        let tree = open(temp.path(), 1_000);
        tree.put("c1", b"k", b"v").unwrap();
        tree.close().unwrap();
    }
    fs::write(temp.path().join("MANIFEST"), b"LMAN garbage").unwrap();

    let result = columnlsm::LsmTree::open(config(temp.path(), 1_000));
    assert!(matches!(result, Err(LsmError::CorruptManifest(_))));
}
