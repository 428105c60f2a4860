//! Tests for validDocIds snapshot rounds
//!
//! These tests verify:
//! - Only immutable segments are persisted, each exactly once
//! - Segments with an existing snapshot are written first
//! - One failing segment does not abort the round
//! - Disabled / stopped managers skip the round
//! - Background submission

use std::fs;
use std::path::Path;
use std::sync::Arc;

use atlas_upsert::bitmap::ThreadSafeBitmap;
use atlas_upsert::config::UpsertConfig;
use atlas_upsert::record::{PrimaryKey, RecordInfo};
use atlas_upsert::segment::snapshot::{self, tmp_path};
use atlas_upsert::segment::{segment_index_dir, Segment};
use atlas_upsert::upsert::PartitionUpsertMetadataManager;
use roaring::RoaringBitmap;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn manager(table_dir: &Path, enable_snapshot: bool) -> PartitionUpsertMetadataManager {
    let config = UpsertConfig::builder()
        .table_data_dir(table_dir)
        .enable_snapshot(enable_snapshot)
        .preload_threads(1)
        .build()
        .unwrap();
    PartitionUpsertMetadataManager::new(config).unwrap()
}

fn sealed(table_dir: &Path, name: &str) -> Arc<Segment> {
    let index_dir = segment_index_dir(table_dir, name);
    fs::create_dir_all(&index_dir).unwrap();
    let segment = Segment::immutable(name, index_dir);
    segment
        .enable_upsert(
            Arc::new(ThreadSafeBitmap::new()),
            Some(Arc::new(ThreadSafeBitmap::new())),
        )
        .unwrap();
    segment
}

fn records(keys: std::ops::Range<i64>) -> Vec<RecordInfo> {
    keys.enumerate()
        .map(|(doc, pk)| RecordInfo::new(PrimaryKey::single(pk), doc as u32, 1i64, false))
        .collect()
}

fn position(persisted: &[String], name: &str) -> usize {
    persisted.iter().position(|n| n == name).unwrap()
}

// =============================================================================
// Ordering and Coverage
// =============================================================================

#[test]
fn test_existing_snapshots_written_first() {
    let dir = TempDir::new().unwrap();
    let manager = manager(dir.path(), true);

    let seg01 = sealed(dir.path(), "seg01");
    let seg02 = sealed(dir.path(), "seg02");
    let seg03 = sealed(dir.path(), "seg03");
    let consuming = Segment::mutable("consuming");
    consuming
        .enable_upsert(Arc::new(ThreadSafeBitmap::new()), None)
        .unwrap();

    // seg02 already has a (stale) snapshot; seg01 has a leftover temp file
    let stale: RoaringBitmap = [99u32].into_iter().collect();
    snapshot::write_snapshot(&seg02.valid_doc_ids_snapshot_path().unwrap(), &stale).unwrap();
    let seg01_path = seg01.valid_doc_ids_snapshot_path().unwrap();
    fs::write(tmp_path(&seg01_path), b"interrupted").unwrap();

    manager.add_segment(&seg01, records(10..16)).unwrap();
    manager.add_segment(&seg02, records(0..4)).unwrap();
    manager.add_segment(&seg03, records(20..23)).unwrap();
    manager.add_segment(&consuming, records(30..32)).unwrap();

    let report = manager.take_snapshot();

    assert_eq!(report.persisted.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(report.skipped_mutable, 1);
    assert_eq!(report.persisted[0], "seg02");
    assert!(position(&report.persisted, "seg02") < position(&report.persisted, "seg01"));
    assert!(position(&report.persisted, "seg02") < position(&report.persisted, "seg03"));

    assert_eq!(seg02.load_valid_doc_ids_from_snapshot().unwrap().len(), 4);
    assert_eq!(seg01.load_valid_doc_ids_from_snapshot().unwrap().len(), 6);
    assert_eq!(seg03.load_valid_doc_ids_from_snapshot().unwrap().len(), 3);
    assert!(!tmp_path(&seg01_path).exists());
}

#[test]
fn test_snapshot_reflects_lost_conflicts() {
    let dir = TempDir::new().unwrap();
    let manager = manager(dir.path(), true);
    let older = sealed(dir.path(), "older");
    let newer = sealed(dir.path(), "newer");

    manager.add_segment(&older, records(0..5)).unwrap();
    let overrides = vec![
        RecordInfo::new(PrimaryKey::single(1), 0, 2i64, false),
        RecordInfo::new(PrimaryKey::single(3), 1, 2i64, false),
    ];
    manager.add_segment(&newer, overrides).unwrap();
    manager.take_snapshot();

    let older_bits = older.load_valid_doc_ids_from_snapshot().unwrap();
    assert_eq!(older_bits.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    assert_eq!(newer.load_valid_doc_ids_from_snapshot().unwrap().len(), 2);
}

#[test]
fn test_failed_segment_does_not_abort_round() {
    let dir = TempDir::new().unwrap();
    let manager = manager(dir.path(), true);

    let good = sealed(dir.path(), "good");
    // index dir never created
    let broken = Segment::immutable("broken", dir.path().join("missing").join("v3"));
    broken
        .enable_upsert(Arc::new(ThreadSafeBitmap::new()), None)
        .unwrap();

    manager.add_segment(&good, records(0..3)).unwrap();
    manager.add_segment(&broken, records(10..12)).unwrap();

    let report = manager.take_snapshot();

    assert_eq!(report.persisted, vec!["good".to_string()]);
    assert_eq!(report.failed, vec!["broken".to_string()]);
    assert!(good.has_valid_doc_ids_snapshot());
}

// =============================================================================
// Skipped Rounds
// =============================================================================

#[test]
fn test_disabled_snapshot_is_noop() {
    let dir = TempDir::new().unwrap();
    let manager = manager(dir.path(), false);
    let seg = sealed(dir.path(), "seg01");
    manager.add_segment(&seg, records(0..3)).unwrap();

    let report = manager.take_snapshot();

    assert!(report.persisted.is_empty());
    assert!(!seg.has_valid_doc_ids_snapshot());
}

#[test]
fn test_stopped_manager_skips_snapshot() {
    let dir = TempDir::new().unwrap();
    let manager = manager(dir.path(), true);
    let seg = sealed(dir.path(), "seg01");
    manager.add_segment(&seg, records(0..3)).unwrap();

    manager.stop();
    let report = manager.take_snapshot();

    assert!(report.persisted.is_empty());
    assert!(!seg.has_valid_doc_ids_snapshot());
}

#[test]
fn test_submit_snapshot_runs_in_background() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager(dir.path(), true));
    let seg = sealed(dir.path(), "seg01");
    manager.add_segment(&seg, records(0..3)).unwrap();

    let report = manager.submit_snapshot().unwrap().join().unwrap();

    assert_eq!(report.persisted, vec!["seg01".to_string()]);
    assert!(seg.has_valid_doc_ids_snapshot());

    manager.close();
    assert!(manager.submit_snapshot().is_err());
}
