//! HashMap-backed key index

use std::collections::HashMap;

use crate::record::HashedKey;
use crate::segment::SegmentId;

use super::{KeyIndex, RecordLocation};

/// In-memory key index
///
/// Concurrency comes from the partition lock held by the manager, not from
/// the map itself.
#[derive(Debug, Default)]
pub struct ConcurrentMapKeyIndex {
    map: HashMap<HashedKey, RecordLocation>,
}

impl ConcurrentMapKeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }
}

impl KeyIndex for ConcurrentMapKeyIndex {
    fn get(&self, key: &HashedKey) -> Option<&RecordLocation> {
        self.map.get(key)
    }

    fn insert(&mut self, key: HashedKey, location: RecordLocation) -> Option<RecordLocation> {
        self.map.insert(key, location)
    }

    fn remove(&mut self, key: &HashedKey) -> Option<RecordLocation> {
        self.map.remove(key)
    }

    fn remove_segment(&mut self, segment: SegmentId) -> usize {
        let before = self.map.len();
        self.map.retain(|_, location| location.segment.id() != segment);
        before - self.map.len()
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&HashedKey, &RecordLocation) -> bool) {
        self.map.retain(|key, location| keep(key, location));
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
