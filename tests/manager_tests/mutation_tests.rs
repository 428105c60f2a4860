//! Tests for the key index mutation path
//!
//! These tests verify:
//! - Highest comparison value wins across segments
//! - At most one valid bit per primary key
//! - Delete records stay valid but leave queryableDocIds
//! - replace_doc_id / replace_segment / remove_segment
//! - Metadata TTL expiry
//! - Stopped manager ignores mutations

use std::collections::HashMap;
use std::sync::Arc;

use atlas_upsert::bitmap::ThreadSafeBitmap;
use atlas_upsert::config::{HashFunction, UpsertConfig};
use atlas_upsert::error::UpsertError;
use atlas_upsert::record::{PrimaryKey, RecordInfo};
use atlas_upsert::segment::Segment;
use atlas_upsert::upsert::PartitionUpsertMetadataManager;

// =============================================================================
// Helper Functions
// =============================================================================

fn manager() -> PartitionUpsertMetadataManager {
    let config = UpsertConfig::builder().preload_threads(1).build().unwrap();
    PartitionUpsertMetadataManager::new(config).unwrap()
}

fn consuming(name: &str) -> Arc<Segment> {
    let segment = Segment::mutable(name);
    segment
        .enable_upsert(
            Arc::new(ThreadSafeBitmap::new()),
            Some(Arc::new(ThreadSafeBitmap::new())),
        )
        .unwrap();
    segment
}

fn record(pk: i64, doc_id: u32, ts: i64) -> RecordInfo {
    RecordInfo::new(PrimaryKey::single(pk), doc_id, ts, false)
}

fn valid(segment: &Segment) -> Vec<u32> {
    segment.valid_doc_ids().unwrap().snapshot().iter().collect()
}

fn queryable(segment: &Segment) -> Vec<u32> {
    segment.queryable_doc_ids().unwrap().snapshot().iter().collect()
}

// =============================================================================
// add_record
// =============================================================================

#[test]
fn test_higher_value_moves_bit_across_segments() {
    let manager = manager();
    let seg1 = consuming("seg1");
    let seg2 = consuming("seg2");

    assert!(manager.add_record(&seg1, &record(1, 0, 10)).unwrap());
    assert!(manager.add_record(&seg2, &record(1, 0, 20)).unwrap());
    assert!(valid(&seg1).is_empty());
    assert_eq!(valid(&seg2), vec![0]);

    // Lower value is discarded
    assert!(!manager.add_record(&seg1, &record(1, 1, 15)).unwrap());
    assert!(valid(&seg1).is_empty());
    assert_eq!(valid(&seg2), vec![0]);
    assert_eq!(manager.num_primary_keys(), 1);
}

#[test]
fn test_equal_value_goes_to_incoming_record() {
    let manager = manager();
    let seg1 = consuming("seg1");
    let seg2 = consuming("seg2");

    manager.add_record(&seg1, &record(1, 0, 10)).unwrap();
    assert!(manager.add_record(&seg2, &record(1, 4, 10)).unwrap());

    assert!(valid(&seg1).is_empty());
    assert_eq!(valid(&seg2), vec![4]);
}

#[test]
fn test_mixed_numeric_comparison_values() {
    let manager = manager();
    let seg1 = consuming("seg1");
    let seg2 = consuming("seg2");

    // Int(5) beats a later Long(3)
    manager
        .add_record(&seg1, &RecordInfo::new(PrimaryKey::single(1), 0, 5i32, false))
        .unwrap();
    let lower = RecordInfo::new(PrimaryKey::single(1), 0, 3i64, false);
    assert!(!manager.add_record(&seg2, &lower).unwrap());
    assert_eq!(valid(&seg1), vec![0]);
    assert!(valid(&seg2).is_empty());

    // Double(5.5) beats Int(5)
    let higher = RecordInfo::new(PrimaryKey::single(1), 1, 5.5f64, false);
    assert!(manager.add_record(&seg2, &higher).unwrap());
    assert!(valid(&seg1).is_empty());
    assert_eq!(valid(&seg2), vec![1]);
}

#[test]
fn test_one_bit_per_key_for_maximum_value() {
    let manager = manager();
    let segments = [consuming("a"), consuming("b"), consuming("c")];
    let mut next_doc = [0u32; 3];

    // (key, value, doc) for every record offered
    let mut offered: Vec<(i64, i64, usize, u32)> = Vec::new();
    let mut seed: u64 = 42;
    for round in 0..400i64 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let key = ((seed >> 33) % 25) as i64;
        let seg = ((seed >> 20) % 3) as usize;
        // distinct values per key, in scrambled order
        let value = ((seed >> 40) % 1_000) as i64 * 1_000 + round;

        let doc_id = next_doc[seg];
        next_doc[seg] += 1;
        manager
            .add_record(&segments[seg], &record(key, doc_id, value))
            .unwrap();
        offered.push((key, value, seg, doc_id));
    }

    let mut best: HashMap<i64, (i64, usize, u32)> = HashMap::new();
    for &(key, value, seg, doc_id) in &offered {
        let entry = best.entry(key).or_insert((value, seg, doc_id));
        if value > entry.0 {
            *entry = (value, seg, doc_id);
        }
    }

    let total_bits: usize = segments.iter().map(|s| valid(s).len()).sum();
    assert_eq!(total_bits, best.len());
    assert_eq!(manager.num_primary_keys(), best.len());
    for (_, (_, seg, doc_id)) in best {
        assert!(segments[seg].valid_doc_ids().unwrap().contains(doc_id));
    }
}

#[test]
fn test_delete_is_valid_but_not_queryable() {
    let manager = manager();
    let seg = consuming("seg");

    manager.add_record(&seg, &record(1, 0, 10)).unwrap();
    manager
        .add_record(&seg, &RecordInfo::new(PrimaryKey::single(1), 1, 11i64, true))
        .unwrap();

    assert_eq!(valid(&seg), vec![1]);
    assert!(queryable(&seg).is_empty());

    // A newer upsert revives the key
    manager.add_record(&seg, &record(1, 2, 12)).unwrap();
    assert_eq!(valid(&seg), vec![2]);
    assert_eq!(queryable(&seg), vec![2]);
}

#[test]
fn test_batch_resolves_ties_before_index() {
    let manager = manager();
    let seg = consuming("seg");

    let batch = vec![record(0, 0, 5), record(1, 1, 5), record(0, 2, 5), record(0, 3, 4)];
    let winners = manager.add_records(&seg, batch).unwrap();

    assert_eq!(winners, 2);
    assert_eq!(valid(&seg), vec![1, 2]);
}

#[test]
fn test_hashed_keys_behave_like_raw_keys() {
    for hash in [HashFunction::Md5, HashFunction::Murmur3] {
        let config = UpsertConfig::builder().hash_function(hash).build().unwrap();
        let manager = PartitionUpsertMetadataManager::new(config).unwrap();
        let seg = consuming("seg");

        manager.add_record(&seg, &record(7, 0, 1)).unwrap();
        manager.add_record(&seg, &record(8, 1, 1)).unwrap();
        manager.add_record(&seg, &record(7, 2, 2)).unwrap();

        assert_eq!(valid(&seg), vec![1, 2], "hash {}", hash);
        assert_eq!(manager.num_primary_keys(), 2);
    }
}

#[test]
fn test_segment_without_upsert_rejected() {
    let manager = manager();
    let seg = Segment::mutable("plain");
    let result = manager.add_record(&seg, &record(1, 0, 1));
    assert!(matches!(result, Err(UpsertError::UpsertNotEnabled(_))));
    assert!(manager.track_segment(seg).is_err());
}

// =============================================================================
// replace_doc_id / replace_segment / remove_segment
// =============================================================================

#[test]
fn test_replace_doc_id_moves_winner() {
    let manager = manager();
    let old = consuming("seg__0__1__100");
    manager.track_segment(Arc::clone(&old)).unwrap();
    manager.add_record(&old, &record(1, 3, 10)).unwrap();

    let sealed = Segment::immutable("seg__0__1__100", "/unused");
    let sealed_valid = ThreadSafeBitmap::new();
    let sealed_queryable = ThreadSafeBitmap::new();

    manager
        .replace_doc_id(
            &sealed,
            &sealed_valid,
            Some(&sealed_queryable),
            &old,
            3,
            0,
            &record(1, 0, 10),
        )
        .unwrap();

    assert!(valid(&old).is_empty());
    assert!(sealed_valid.contains(0));
    assert!(sealed_queryable.contains(0));

    let location = manager.update_record(&record(1, 0, 10)).unwrap().unwrap();
    assert_eq!(location.segment.id(), sealed.id());
    assert_eq!(location.doc_id, 0);
}

#[test]
fn test_replace_doc_id_keeps_newer_winner() {
    let manager = manager();
    let old = consuming("old");
    let other = consuming("other");
    manager.add_record(&old, &record(1, 3, 10)).unwrap();
    manager.add_record(&other, &record(1, 0, 20)).unwrap();

    let sealed = Segment::immutable("sealed", "/unused");
    let sealed_valid = ThreadSafeBitmap::new();
    manager
        .replace_doc_id(&sealed, &sealed_valid, None, &old, 3, 0, &record(1, 0, 10))
        .unwrap();

    let location = manager.update_record(&record(1, 0, 0)).unwrap().unwrap();
    assert_eq!(location.segment.id(), other.id());
    assert!(!sealed_valid.contains(0));
    assert_eq!(valid(&other), vec![0]);
}

#[test]
fn test_replace_segment() {
    let manager = manager();
    let old = consuming("orders__0__1__100");
    manager.track_segment(Arc::clone(&old)).unwrap();
    for pk in 0..5 {
        manager.add_record(&old, &record(pk, pk as u32, 10)).unwrap();
    }

    let sealed = Segment::immutable("orders__0__1__100", "/unused");
    sealed
        .enable_upsert(
            Arc::new(ThreadSafeBitmap::new()),
            Some(Arc::new(ThreadSafeBitmap::new())),
        )
        .unwrap();
    // sealed segment reorders rows; key 4 is absent
    let records = (0..4).map(|pk| record(pk, 10 + pk as u32, 10));
    let moved = manager.replace_segment(&sealed, records, &old).unwrap();

    assert_eq!(moved, 4);
    assert!(!manager.is_tracked(&old));
    assert!(manager.is_tracked(&sealed));
    assert_eq!(valid(&sealed), vec![10, 11, 12, 13]);
    assert_eq!(manager.num_primary_keys(), 4);
    assert_eq!(manager.tracked_segment_count(), 1);
}

#[test]
fn test_remove_segment_drops_its_keys() {
    let manager = manager();
    let seg1 = consuming("seg1");
    let seg2 = consuming("seg2");
    manager.add_segment(&seg1, vec![record(1, 0, 1), record(2, 1, 1)]).unwrap();
    manager.add_segment(&seg2, vec![record(3, 0, 1)]).unwrap();
    assert_eq!(manager.tracked_segment_count(), 2);

    let dropped = manager.remove_segment(&seg1);

    assert_eq!(dropped, 2);
    assert_eq!(manager.num_primary_keys(), 1);
    assert!(!manager.is_tracked(&seg1));
    assert!(manager.update_record(&record(1, 0, 1)).unwrap().is_none());
}

// =============================================================================
// TTL and Lifecycle
// =============================================================================

#[test]
fn test_remove_expired_primary_keys() {
    let config = UpsertConfig::builder().metadata_ttl(10.0).build().unwrap();
    let manager = PartitionUpsertMetadataManager::new(config).unwrap();
    let seg = consuming("seg");

    manager.add_record(&seg, &record(1, 0, 80)).unwrap();
    manager.add_record(&seg, &record(2, 1, 95)).unwrap();
    manager.add_record(&seg, &record(3, 2, 100)).unwrap();

    assert_eq!(manager.remove_expired_primary_keys(), 1);
    assert_eq!(manager.num_primary_keys(), 2);
    // bitmaps are untouched
    assert_eq!(valid(&seg), vec![0, 1, 2]);
}

#[test]
fn test_no_ttl_means_no_expiry() {
    let manager = manager();
    let seg = consuming("seg");
    manager.add_record(&seg, &record(1, 0, 1)).unwrap();
    manager.add_record(&seg, &record(2, 1, 1_000_000)).unwrap();
    assert_eq!(manager.remove_expired_primary_keys(), 0);
}

#[test]
fn test_stopped_manager_ignores_mutations() {
    let manager = manager();
    let seg = consuming("seg");
    manager.add_record(&seg, &record(1, 0, 1)).unwrap();

    manager.stop();
    assert!(manager.is_stopped());
    assert!(!manager.add_record(&seg, &record(2, 1, 1)).unwrap());
    assert_eq!(manager.add_records(&seg, vec![record(3, 2, 1)]).unwrap(), 0);

    assert_eq!(valid(&seg), vec![0]);
    assert_eq!(manager.num_primary_keys(), 1);
    manager.close();
}
