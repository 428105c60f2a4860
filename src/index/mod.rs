//! Key Index Module
//!
//! Maps each primary key to the row currently representing it.
//!
//! ## Responsibilities
//! - Point lookups and upserts of key → winning location
//! - Bulk removal of every key whose winner lives in a given segment
//! - Entry count for metrics / tests
//!
//! The partition manager owns the index behind its partition lock and only
//! ever calls it with that lock held, so implementations need no internal
//! synchronization. Backends are swappable through the `KeyIndex` trait.

mod map;

use std::sync::Arc;

use crate::record::{DocId, HashedKey, Value};
use crate::segment::{Segment, SegmentId};

pub use map::ConcurrentMapKeyIndex;

/// Where the current winner of a primary key lives
#[derive(Debug, Clone)]
pub struct RecordLocation {
    /// Segment holding the winning row
    pub segment: Arc<Segment>,

    /// Row ordinal inside that segment
    pub doc_id: DocId,

    /// Comparison value of the winning row
    pub comparison_value: Value,
}

impl RecordLocation {
    pub fn new(segment: Arc<Segment>, doc_id: DocId, comparison_value: Value) -> Self {
        Self {
            segment,
            doc_id,
            comparison_value,
        }
    }

    /// Whether this location points at `(segment, doc_id)`
    pub fn is_at(&self, segment: SegmentId, doc_id: DocId) -> bool {
        self.segment.id() == segment && self.doc_id == doc_id
    }
}

/// Key index capability used by the partition manager
pub trait KeyIndex: Send + Sync {
    /// Current winner of a key
    fn get(&self, key: &HashedKey) -> Option<&RecordLocation>;

    /// Set the winner of a key, returning the displaced location
    fn insert(&mut self, key: HashedKey, location: RecordLocation) -> Option<RecordLocation>;

    /// Drop a key
    fn remove(&mut self, key: &HashedKey) -> Option<RecordLocation>;

    /// Drop every key whose winner lives in `segment`; returns how many were dropped
    fn remove_segment(&mut self, segment: SegmentId) -> usize;

    /// Keep only the entries for which `keep` returns true
    fn retain(&mut self, keep: &mut dyn FnMut(&HashedKey, &RecordLocation) -> bool);

    /// Number of primary keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
