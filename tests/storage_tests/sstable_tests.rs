//! Tests for SSTable builder and reader
//!
//! These tests verify:
//! - Building SSTables from sorted entries
//! - Point lookups (values, tombstones, absent keys)
//! - Inclusive range scans across blocks
//! - Atomic publication (temp file, rename)
//! - Corrupt footers and blocks reported as CorruptSegment

use std::fs;
use std::sync::Arc;

use columnlsm::codec::{Codec, NoCompression, SnappyCodec};
use columnlsm::storage::sstable::table_path;
use columnlsm::storage::{SSTableBuilder, SSTableReader};
use columnlsm::types::{in_range, Entry};
use columnlsm::LsmError;
use tempfile::TempDir;

use super::{build_table, key, options, sorted_entries, value};

fn snappy() -> Arc<dyn Codec> {
    Arc::new(SnappyCodec)
}

fn open(path: &std::path::Path) -> Arc<SSTableReader> {
    Arc::new(SSTableReader::open(path, &snappy()).unwrap())
}

// =============================================================================
// Build + Lookup Tests
// =============================================================================

#[test]
fn test_build_and_get() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(100, 1), 4096);

    let reader = open(&path);
    for i in 0..100 {
        let entry = reader.get(&key(i)).unwrap().unwrap();
        assert_eq!(entry.value, Some(value(i)));
        assert_eq!(entry.sequence, 1 + i as u64);
    }
    assert!(reader.get(b"key99999").unwrap().is_none());
    assert!(reader.get(b"a").unwrap().is_none());
}

#[test]
fn test_metadata() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let meta = build_table(&path, "metrics", 2, &sorted_entries(50, 10), 4096);

    assert_eq!(meta.column, "metrics");
    assert_eq!(meta.level, 2);
    assert_eq!(meta.entry_count, 50);
    assert_eq!(meta.min_key, key(0));
    assert_eq!(meta.max_key, key(49));
    assert_eq!(meta.min_sequence, 10);
    assert_eq!(meta.max_sequence, 59);
    assert_eq!(meta.file_size, fs::metadata(&path).unwrap().len());

    let reader = open(&path);
    assert_eq!(reader.meta(), &meta);
}

#[test]
fn test_tombstone_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let entries = vec![
        Entry::put(b"a".to_vec(), b"1".to_vec(), 1),
        Entry::tombstone(b"b".to_vec(), 2),
        Entry::put(b"c".to_vec(), Vec::new(), 3),
    ];
    build_table(&path, "c1", 0, &entries, 4096);

    let reader = open(&path);
    assert!(reader.get(b"b").unwrap().unwrap().is_tombstone());
    // An empty value is not a tombstone
    assert_eq!(reader.get(b"c").unwrap().unwrap().value, Some(Vec::new()));
}

#[test]
fn test_small_blocks_build_sparse_index() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(500, 1), 256);

    let reader = open(&path);
    assert!(reader.block_count() > 10);
    for i in (0..500).step_by(37) {
        assert_eq!(reader.get(&key(i)).unwrap().unwrap().value, Some(value(i)));
    }
}

#[test]
fn test_uncompressed_table_readable_with_other_configured_codec() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let mut opts = options(4096);
    opts.codec = Arc::new(NoCompression);
    let mut builder = SSTableBuilder::new(&path, "c1", 1, 0, 10, opts).unwrap();
    for entry in sorted_entries(10, 1) {
        builder.add(&entry).unwrap();
    }
    builder.finish().unwrap();

    let reader = open(&path);
    assert_eq!(reader.get(&key(3)).unwrap().unwrap().value, Some(value(3)));
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_range_inclusive() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(500, 1), 256);

    let reader = open(&path);
    let keys: Vec<Vec<u8>> = reader
        .scan_range(&key(100), &key(199))
        .map(|e| e.unwrap().key)
        .collect();
    assert_eq!(keys, (100..200).map(key).collect::<Vec<_>>());
}

#[test]
fn test_key_span_bounds_are_inclusive() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let meta = build_table(&path, "c1", 0, &sorted_entries(10, 1), 4096);

    assert!(meta.key_in_range(&key(0)));
    assert!(meta.key_in_range(&key(9)));
    assert!(!meta.key_in_range(&key(10)));
    assert!(!meta.key_in_range(b"a"));

    assert!(in_range(b"b", b"b", b"b"));
    assert!(!in_range(b"b", b"c", b"a"));
}

#[test]
fn test_scan_range_outside_table() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(10, 1), 4096);

    let reader = open(&path);
    assert_eq!(reader.scan_range(b"zzz", b"zzzz").count(), 0);
    assert_eq!(reader.scan_range(&key(5), &key(2)).count(), 0);
}

#[test]
fn test_scan_is_restartable() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(200, 1), 256);

    let reader = open(&path);
    let first: Vec<Entry> = reader.scan_range(&key(10), &key(150)).map(Result::unwrap).collect();
    let second: Vec<Entry> = reader.scan_range(&key(10), &key(150)).map(Result::unwrap).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 141);
}

#[test]
fn test_full_iteration() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let entries = sorted_entries(300, 1);
    build_table(&path, "c1", 0, &entries, 512);

    let reader = open(&path);
    let all: Vec<Entry> = reader.iter().map(Result::unwrap).collect();
    assert_eq!(all, entries);
}

// =============================================================================
// Builder Contract Tests
// =============================================================================

#[test]
fn test_builder_rejects_unsorted_keys() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let mut builder = SSTableBuilder::new(&path, "c1", 1, 0, 2, options(4096)).unwrap();

    builder.add(&Entry::put(b"b".to_vec(), b"1".to_vec(), 1)).unwrap();
    assert!(matches!(
        builder.add(&Entry::put(b"a".to_vec(), b"2".to_vec(), 2)),
        Err(LsmError::Storage(_))
    ));
    assert!(builder.add(&Entry::put(b"b".to_vec(), b"3".to_vec(), 3)).is_err());
    builder.abandon();
}

#[test]
fn test_file_published_only_on_finish() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 7);
    let mut builder = SSTableBuilder::new(&path, "c1", 7, 0, 1, options(4096)).unwrap();
    builder.add(&Entry::put(b"k".to_vec(), b"v".to_vec(), 1)).unwrap();

    assert!(!path.exists());
    assert!(path.with_extension("tmp").exists());

    builder.finish().unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn test_abandon_removes_temp_file() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    let mut builder = SSTableBuilder::new(&path, "c1", 1, 0, 1, options(4096)).unwrap();
    builder.add(&Entry::put(b"k".to_vec(), b"v".to_vec(), 1)).unwrap();
    builder.abandon();

    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_missing_file_is_corrupt_segment() {
    let temp = TempDir::new().unwrap();
    let result = SSTableReader::open(&table_path(temp.path(), 1), &snappy());
    assert!(matches!(result, Err(LsmError::CorruptSegment { .. })));
}

#[test]
fn test_bad_footer_is_corrupt_segment() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(10, 1), 4096);

    let mut bytes = fs::read(&path).unwrap();
    let len = bytes.len();
    bytes[len - 1] = b'X';
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        SSTableReader::open(&path, &snappy()),
        Err(LsmError::CorruptSegment { .. })
    ));
}

#[test]
fn test_truncated_file_is_corrupt_segment() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(10, 1), 4096);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(matches!(
        SSTableReader::open(&path, &snappy()),
        Err(LsmError::CorruptSegment { .. })
    ));
}

#[test]
fn test_block_checksum_failure_flags_table() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(10, 1), 4096);

    // First data block starts at offset 0
    let mut bytes = fs::read(&path).unwrap();
    bytes[2] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let reader = open(&path);
    assert!(!reader.is_corrupt());
    assert!(matches!(reader.get(&key(0)), Err(LsmError::CorruptSegment { .. })));
    assert!(reader.is_corrupt());
}

#[test]
fn test_bloom_negative_skips_disk() {
    let temp = TempDir::new().unwrap();
    let path = table_path(temp.path(), 1);
    build_table(&path, "c1", 0, &sorted_entries(100, 1), 64 * 1024);

    // Damage the only data block; any disk read would now fail
    let mut bytes = fs::read(&path).unwrap();
    bytes[2] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let reader = open(&path);
    let absent: Vec<Vec<u8>> = (0..2_000)
        .map(|i| format!("key{:05}x", i).into_bytes())
        .filter(|k| !reader.may_contain(k))
        .take(50)
        .collect();
    assert!(!absent.is_empty());

    for k in &absent {
        assert!(reader.get(k).unwrap().is_none());
    }
    assert!(!reader.is_corrupt());
}
