//! Tests for the LsmTree read/write API
//!
//! These tests verify:
//! - Read-your-write before any flush
//! - Deletes shadow older SSTables
//! - Column isolation
//! - Flush threshold behavior
//! - Batches (atomic, contiguous sequences)
//! - Inclusive range scans merged across MemTable and SSTables

use columnlsm::{Config, LsmError, LsmTree, WriteBatch};
use tempfile::TempDir;

use super::{open, scan, scan_keys};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_then_get() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("c1", b"key", b"value").unwrap();
    assert_eq!(tree.get("c1", b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(tree.sstable_count("c1"), 0);
}

#[test]
fn test_get_missing() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);
    tree.put("c1", b"key", b"value").unwrap();

    assert_eq!(tree.get("c1", b"other").unwrap(), None);
    assert_eq!(tree.get("nope", b"key").unwrap(), None);
}

#[test]
fn test_overwrite() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("c1", b"k", b"v1").unwrap();
    tree.put("c1", b"k", b"v2").unwrap();
    assert_eq!(tree.get("c1", b"k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(tree.memtable_entry_count(), 1);
}

#[test]
fn test_sequences_increase() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    let s1 = tree.put("c1", b"a", b"1").unwrap();
    let s2 = tree.delete("c1", b"a").unwrap();
    let s3 = tree.put("c2", b"a", b"1").unwrap();
    assert!(s1 < s2 && s2 < s3);
    assert_eq!(tree.last_sequence(), s3);
}

#[test]
fn test_columns_are_isolated() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("cpu", b"host1", b"0.5").unwrap();
    tree.put("mem", b"host1", b"2048").unwrap();
    tree.delete("cpu", b"host1").unwrap();

    assert_eq!(tree.get("cpu", b"host1").unwrap(), None);
    assert_eq!(tree.get("mem", b"host1").unwrap(), Some(b"2048".to_vec()));
    assert_eq!(tree.columns(), vec!["cpu".to_string(), "mem".to_string()]);
}

#[test]
fn test_binary_keys_and_empty_value() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("c1", &[0u8, 255, 7], b"").unwrap();
    assert_eq!(tree.get("c1", &[0u8, 255, 7]).unwrap(), Some(Vec::new()));

    tree.flush().unwrap();
    assert_eq!(tree.get("c1", &[0u8, 255, 7]).unwrap(), Some(Vec::new()));
}

#[test]
fn test_invalid_config_rejected() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .memtable_entry_limit(0)
        .build();

    assert!(matches!(LsmTree::open(config), Err(LsmError::Config(_))));
}

// =============================================================================
// Tombstones
// =============================================================================

#[test]
fn test_delete_in_memtable() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("c1", b"k", b"v").unwrap();
    tree.delete("c1", b"k").unwrap();
    assert_eq!(tree.get("c1", b"k").unwrap(), None);
}

#[test]
fn test_delete_shadows_sstables() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);

    // Several SSTables each holding an older value of k
    for round in 0..3 {
        tree.put("c1", b"k", format!("v{}", round).as_bytes()).unwrap();
        tree.flush().unwrap();
    }
    assert!(tree.sstable_count("c1") >= 1);

    tree.delete("c1", b"k").unwrap();
    assert_eq!(tree.get("c1", b"k").unwrap(), None);

    // Tombstone now on disk too
    tree.flush().unwrap();
    assert_eq!(tree.get("c1", b"k").unwrap(), None);
    assert!(scan(&tree, "c1", b"a", b"z").is_empty());
}

#[test]
fn test_put_after_delete() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);

    tree.put("c1", b"k", b"v1").unwrap();
    tree.delete("c1", b"k").unwrap();
    tree.flush().unwrap();
    tree.put("c1", b"k", b"v2").unwrap();

    assert_eq!(tree.get("c1", b"k").unwrap(), Some(b"v2".to_vec()));
}

// =============================================================================
// Flush Threshold
// =============================================================================

#[test]
fn test_threshold_triggers_exactly_one_flush() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 10);

    for i in 0..9 {
        tree.put("c1", format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    assert_eq!(tree.sstable_count("c1"), 0);
    assert_eq!(tree.memtable_entry_count(), 9);

    tree.put("c1", b"k9", b"v").unwrap();
    assert_eq!(tree.sstable_count("c1"), 1);
    assert_eq!(tree.memtable_entry_count(), 0);

    for i in 0..10 {
        assert_eq!(tree.get("c1", format!("k{}", i).as_bytes()).unwrap(), Some(b"v".to_vec()));
    }
}

#[test]
fn test_flush_empty_is_noop() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 10);

    tree.flush().unwrap();
    assert_eq!(tree.total_sstable_count(), 0);
}

#[test]
fn test_flush_writes_one_table_per_column() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);

    tree.put("a", b"k", b"1").unwrap();
    tree.put("b", b"k", b"2").unwrap();
    tree.flush().unwrap();

    assert_eq!(tree.sstable_count("a"), 1);
    assert_eq!(tree.sstable_count("b"), 1);
    assert_eq!(tree.level_table_count("a", 0), 1);
    assert_eq!(tree.memtable_entry_count(), 0);
}

#[test]
fn test_flush_releases_wal_segments() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 100);
    tree.put("c1", b"k", b"v").unwrap();
    tree.flush().unwrap();

    let segments = columnlsm::wal::list_segments(&temp.path().join("wal")).unwrap();
    assert_eq!(segments.len(), 1);
}

// =============================================================================
// Scenario: 1000 keys
// =============================================================================

#[test]
fn test_thousand_keys_scenario() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 128);

    for i in 0..1000 {
        let value = format!("{{\"value\": {}}}", i);
        tree.put("column1", format!("key{}", i).as_bytes(), value.as_bytes()).unwrap();
    }
    assert!(tree.sstable_count("column1") > 0);

    assert_eq!(
        tree.get("column1", b"key2").unwrap(),
        Some(b"{\"value\": 2}".to_vec())
    );

    // Byte order: key0 < key1 < key10 < key100 < ... < key2
    assert_eq!(
        scan_keys(&tree, "column1", b"key0", b"key10"),
        vec!["key0", "key1", "key10"]
    );

    let everything = scan(&tree, "column1", b"key", b"key999");
    assert_eq!(everything.len(), 1000);
    assert!(everything.windows(2).all(|w| w[0].0 < w[1].0));
}

// =============================================================================
// Batches
// =============================================================================

#[test]
fn test_put_batch() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);
    let before = tree.last_sequence();

    let last = tree
        .put_batch(vec![("c1", "a", "1"), ("c1", "b", "2"), ("c2", "a", "3")])
        .unwrap();

    assert_eq!(last, before + 3);
    assert_eq!(tree.get("c1", b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(tree.get("c2", b"a").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_batch_later_ops_win() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);

    let mut batch = WriteBatch::new();
    batch.put("c1", b"k", b"first").put("c1", b"k", b"second").put("c1", b"gone", b"x");
    batch.delete("c1", b"gone");
    assert_eq!(batch.len(), 4);
    tree.write(batch).unwrap();

    assert_eq!(tree.get("c1", b"k").unwrap(), Some(b"second".to_vec()));
    assert_eq!(tree.get("c1", b"gone").unwrap(), None);
}

#[test]
fn test_empty_batch_is_noop() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);
    tree.put("c1", b"k", b"v").unwrap();
    let before = tree.last_sequence();

    assert_eq!(tree.write(WriteBatch::new()).unwrap(), before);
    assert_eq!(tree.put_batch(Vec::<(&str, &str, &str)>::new()).unwrap(), before);
    assert_eq!(tree.last_sequence(), before);
}

#[test]
fn test_batch_crossing_threshold() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 10);

    let rows: Vec<(String, String, String)> = (0..25)
        .map(|i| ("c1".to_string(), format!("k{:02}", i), format!("v{}", i)))
        .collect();
    tree.put_batch(rows).unwrap();

    assert_eq!(tree.sstable_count("c1"), 1);
    assert_eq!(tree.memtable_entry_count(), 0);
    assert_eq!(scan(&tree, "c1", b"k00", b"k99").len(), 25);
}

// =============================================================================
// Range Scans
// =============================================================================

#[test]
fn test_scan_merges_layers() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);

    tree.put_batch(vec![("c", "a", "a1"), ("c", "b", "b1"), ("c", "c", "c1")]).unwrap();
    tree.flush().unwrap();
    tree.put_batch(vec![("c", "b", "b2"), ("c", "d", "d1")]).unwrap();
    tree.flush().unwrap();
    tree.put("c", b"c", b"c3").unwrap();
    tree.delete("c", b"a").unwrap();

    let pairs = scan(&tree, "c", b"a", b"z");
    let expected: Vec<(Vec<u8>, Vec<u8>)> = [("b", "b2"), ("c", "c3"), ("d", "d1")]
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    assert_eq!(pairs, expected);
}

#[test]
fn test_scan_bounds_inclusive() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 1_000);
    tree.put_batch(vec![("c", "a", "1"), ("c", "b", "2"), ("c", "c", "3"), ("c", "d", "4")])
        .unwrap();

    assert_eq!(scan_keys(&tree, "c", b"b", b"c"), vec!["b", "c"]);
    tree.flush().unwrap();
    assert_eq!(scan_keys(&tree, "c", b"b", b"c"), vec!["b", "c"]);
    assert!(scan_keys(&tree, "c", b"c", b"b").is_empty());
    assert!(scan_keys(&tree, "other", b"a", b"z").is_empty());
}

#[test]
fn test_scan_is_restartable() {
    let temp = TempDir::new().unwrap();
    let tree = open(temp.path(), 50);
    for i in 0..200 {
        tree.put("c", format!("{:03}", i).as_bytes(), b"v").unwrap();
    }

    let first = scan(&tree, "c", b"000", b"199");
    let second = scan(&tree, "c", b"000", b"199");
    assert_eq!(first.len(), 200);
    assert_eq!(first, second);
}
