//! Segment Module
//!
//! Storage units participating in a partition's upsert metadata.
//!
//! ## Responsibilities
//! - Stable per-process identity for each segment
//! - Own the validDocIds / queryableDocIds bitmaps once upsert is enabled
//! - Persist and load validDocIds snapshots for sealed segments
//! - Carry per-query bitmap snapshots (`SegmentContext`)

pub mod snapshot;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use crate::bitmap::ThreadSafeBitmap;
use crate::error::{Result, UpsertError};

pub use snapshot::{VALID_DOC_IDS_SNAPSHOT_FILE_NAME, TMP_SUFFIX};

/// Index format subdirectory holding a sealed segment's files
pub const SEGMENT_V3_DIR: &str = "v3";

/// `{table_data_dir}/{segment_name}`
pub fn segment_dir(table_data_dir: &Path, segment_name: &str) -> PathBuf {
    table_data_dir.join(segment_name)
}

/// `{table_data_dir}/{segment_name}/v3`
pub fn segment_index_dir(table_data_dir: &Path, segment_name: &str) -> PathBuf {
    segment_dir(table_data_dir, segment_name).join(SEGMENT_V3_DIR)
}

/// Next segment identity (atomic, lock-free)
static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique segment identity
///
/// A sealed segment usually keeps the name of the consuming segment it
/// replaces, so tracking is keyed by identity rather than by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u64);

impl SegmentId {
    fn next() -> Self {
        SegmentId(NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mutable (consuming) or immutable (sealed) segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Actively appended; state is rebuilt by replay after restart
    Mutable,

    /// Sealed; snapshot files live in `index_dir`
    Immutable { index_dir: PathBuf },
}

/// Bitmaps registered by `enable_upsert`
#[derive(Debug)]
struct UpsertBitmaps {
    valid_doc_ids: Arc<ThreadSafeBitmap>,
    queryable_doc_ids: Option<Arc<ThreadSafeBitmap>>,
}

/// A segment as seen by the upsert metadata manager
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    name: String,
    kind: SegmentKind,
    upsert: OnceLock<UpsertBitmaps>,
}

impl Segment {
    /// A consuming segment
    pub fn mutable(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: SegmentId::next(),
            name: name.into(),
            kind: SegmentKind::Mutable,
            upsert: OnceLock::new(),
        })
    }

    /// A sealed segment whose index files live in `index_dir`
    pub fn immutable(name: impl Into<String>, index_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            id: SegmentId::next(),
            name: name.into(),
            kind: SegmentKind::Immutable {
                index_dir: index_dir.into(),
            },
            upsert: OnceLock::new(),
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self.kind, SegmentKind::Mutable)
    }

    pub fn index_dir(&self) -> Option<&Path> {
        match &self.kind {
            SegmentKind::Immutable { index_dir } => Some(index_dir),
            SegmentKind::Mutable => None,
        }
    }

    // =========================================================================
    // Upsert Bitmaps
    // =========================================================================

    /// Register the segment's upsert bitmaps (once per segment)
    pub fn enable_upsert(
        &self,
        valid_doc_ids: Arc<ThreadSafeBitmap>,
        queryable_doc_ids: Option<Arc<ThreadSafeBitmap>>,
    ) -> Result<()> {
        self.upsert
            .set(UpsertBitmaps {
                valid_doc_ids,
                queryable_doc_ids,
            })
            .map_err(|_| {
                UpsertError::Segment(format!("Upsert already enabled for segment {}", self.name))
            })
    }

    pub fn is_upsert_enabled(&self) -> bool {
        self.upsert.get().is_some()
    }

    pub fn valid_doc_ids(&self) -> Option<&Arc<ThreadSafeBitmap>> {
        self.upsert.get().map(|u| &u.valid_doc_ids)
    }

    pub fn queryable_doc_ids(&self) -> Option<&Arc<ThreadSafeBitmap>> {
        self.upsert.get().and_then(|u| u.queryable_doc_ids.as_ref())
    }

    /// Bitmap used to filter query results: queryableDocIds when present,
    /// otherwise validDocIds
    pub fn query_bitmap(&self) -> Option<&Arc<ThreadSafeBitmap>> {
        self.upsert
            .get()
            .map(|u| u.queryable_doc_ids.as_ref().unwrap_or(&u.valid_doc_ids))
    }

    // =========================================================================
    // ValidDocIds Snapshot
    // =========================================================================

    /// Snapshot file path (immutable segments only)
    pub fn valid_doc_ids_snapshot_path(&self) -> Option<PathBuf> {
        self.index_dir()
            .map(|dir| dir.join(VALID_DOC_IDS_SNAPSHOT_FILE_NAME))
    }

    pub fn has_valid_doc_ids_snapshot(&self) -> bool {
        self.valid_doc_ids_snapshot_path()
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Persist validDocIds to the snapshot file
    ///
    /// Holds only this segment's bitmap lock, and only while copying it.
    pub fn persist_valid_doc_ids_snapshot(&self) -> Result<()> {
        let path = self.valid_doc_ids_snapshot_path().ok_or_else(|| {
            UpsertError::Segment(format!(
                "Cannot snapshot mutable segment {}",
                self.name
            ))
        })?;
        let valid_doc_ids = self
            .valid_doc_ids()
            .ok_or_else(|| UpsertError::UpsertNotEnabled(self.name.clone()))?;

        let bitmap = valid_doc_ids.snapshot();
        snapshot::write_snapshot(&path, &bitmap)?;

        tracing::debug!(
            segment = %self.name,
            cardinality = bitmap.len(),
            "Persisted validDocIds snapshot"
        );
        Ok(())
    }

    /// Load validDocIds from the snapshot file
    pub fn load_valid_doc_ids_from_snapshot(&self) -> Result<RoaringBitmap> {
        let path = self.valid_doc_ids_snapshot_path().ok_or_else(|| {
            UpsertError::SnapshotNotFound(format!("mutable segment {}", self.name))
        })?;
        snapshot::read_snapshot(&path)
    }

    /// Remove the snapshot file (e.g. when it was found to be stale)
    pub fn delete_valid_doc_ids_snapshot(&self) -> Result<()> {
        if let Some(path) = self.valid_doc_ids_snapshot_path() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Per-query pairing of a segment with a copy of its queryable bitmap
///
/// The snapshot never aliases the segment's live bitmap. In SNAPSHOT mode,
/// contexts served from the same cached view share the same `Arc`.
#[derive(Debug, Clone)]
pub struct SegmentContext {
    segment: Arc<Segment>,
    queryable_doc_ids_snapshot: Option<Arc<RoaringBitmap>>,
}

impl SegmentContext {
    pub fn new(segment: Arc<Segment>) -> Self {
        Self {
            segment,
            queryable_doc_ids_snapshot: None,
        }
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn queryable_doc_ids_snapshot(&self) -> Option<&Arc<RoaringBitmap>> {
        self.queryable_doc_ids_snapshot.as_ref()
    }

    pub fn set_queryable_doc_ids_snapshot(&mut self, snapshot: Arc<RoaringBitmap>) {
        self.queryable_doc_ids_snapshot = Some(snapshot);
    }
}
