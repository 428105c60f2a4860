//! Bitmap Module
//!
//! Thread-safe set of doc ids backing validDocIds / queryableDocIds.
//!
//! ## Responsibilities
//! - Independent per-segment locking (decoupled from the partition lock)
//! - Clone-on-read snapshots; the guarded bitmap never escapes
//! - Controlled mutation: add / remove / wholesale replace

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::record::DocId;

/// Doc id bitmap owned by one segment
///
/// ## Concurrency:
/// - Readers (`contains`, `cardinality`, `snapshot`) share the read lock
/// - Writers (`add`, `remove`, `replace_with`) take the write lock briefly
#[derive(Debug, Default)]
pub struct ThreadSafeBitmap {
    inner: RwLock<RoaringBitmap>,
}

impl ThreadSafeBitmap {
    /// Create an empty bitmap
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing bitmap
    pub fn from_bitmap(bitmap: RoaringBitmap) -> Self {
        Self {
            inner: RwLock::new(bitmap),
        }
    }

    /// Bitmap holding the given doc ids
    pub fn from_doc_ids(doc_ids: impl IntoIterator<Item = DocId>) -> Self {
        Self::from_bitmap(doc_ids.into_iter().collect())
    }

    pub fn add(&self, doc_id: DocId) {
        self.inner.write().insert(doc_id);
    }

    pub fn remove(&self, doc_id: DocId) {
        self.inner.write().remove(doc_id);
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.inner.read().contains(doc_id)
    }

    pub fn cardinality(&self) -> u64 {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Point-in-time copy of the bitmap
    pub fn snapshot(&self) -> RoaringBitmap {
        self.inner.read().clone()
    }

    /// Replace the whole content (used when loading from a snapshot file)
    pub fn replace_with(&self, bitmap: RoaringBitmap) {
        *self.inner.write() = bitmap;
    }
}
