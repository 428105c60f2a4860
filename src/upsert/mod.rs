//! Upsert Module
//!
//! The partition upsert metadata manager: coordinates the key index, segment
//! bitmaps, query views, snapshots and preloading for one partition.
//!
//! ## Responsibilities
//! - Track segments participating in the partition's upsert metadata
//! - Resolve write conflicts by comparison value (highest wins)
//! - Serve queries a consistency-controlled view of queryable rows
//! - Persist validDocIds snapshots and warm them back at startup

mod mutation;
mod persist;
mod preload;
mod view;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::assignment::SegmentAssignmentSource;
use crate::config::UpsertConfig;
use crate::error::{Result, UpsertError};
use crate::executor::TaskExecutor;
use crate::index::{ConcurrentMapKeyIndex, KeyIndex};
use crate::record::Value;
use crate::segment::{Segment, SegmentId};

pub use persist::SnapshotReport;
pub use preload::{
    plan_preload, PreloadPlan, PreloadReport, PreloadRequest, PreloadSkip, PreloadedSegment,
    SegmentPreloader, SegmentRecordReader, SnapshotPreloader,
};
pub use view::UpsertView;

/// State guarded by the partition lock
pub(crate) struct PartitionState<I> {
    /// Primary key → current winner
    pub(crate) key_index: I,

    /// Largest numeric comparison value seen (metadata TTL anchor)
    pub(crate) largest_seen_comparison_value: Option<f64>,
}

impl<I> PartitionState<I> {
    pub(crate) fn observe(&mut self, comparison_value: &Value) {
        if let Some(v) = comparison_value.as_f64() {
            match self.largest_seen_comparison_value {
                Some(largest) if largest >= v => {}
                _ => self.largest_seen_comparison_value = Some(v),
            }
        }
    }
}

/// Upsert metadata manager for one partition of a table
///
/// ## Concurrency Model
///
/// - **Partition lock** (`state`, RwLock): write side for every key index
///   mutation (add/replace/remove), for SYNC view construction and for
///   SNAPSHOT view rebuilds. Lock-free for NONE reads and SNAPSHOT cache hits.
/// - **Segment bitmap locks**: each `ThreadSafeBitmap` locks itself, so a
///   NONE read of one segment never waits on mutation of another.
/// - **Snapshot lock**: one snapshot round at a time; never held together
///   with the partition lock.
/// - Lock order: partition lock → view cache → tracked segments → bitmap.
pub struct PartitionUpsertMetadataManager<I: KeyIndex = ConcurrentMapKeyIndex> {
    /// Manager configuration
    config: UpsertConfig,

    /// Partition lock around the key index
    state: RwLock<PartitionState<I>>,

    /// Segments currently participating, keyed by identity
    tracked_segments: RwLock<HashMap<SegmentId, Arc<Segment>>>,

    /// Cached view for SNAPSHOT consistency
    upsert_view: RwLock<Option<Arc<UpsertView>>>,

    /// Serializes snapshot rounds
    snapshot_lock: Mutex<()>,

    /// True from construction until preload completes (or is inapplicable)
    is_preloading: AtomicBool,

    /// Set by the one caller that runs preload
    preload_claimed: AtomicBool,

    /// Set by `stop()`; mutations are ignored afterwards
    stopped: AtomicBool,

    /// Background executor for preload and async snapshots
    executor: TaskExecutor,

    /// Segment placement, consulted during preload selection
    assignment_source: Option<Arc<dyn SegmentAssignmentSource>>,

    /// Loads a segment from its snapshot during preload
    preloader: Option<Arc<dyn SegmentPreloader>>,
}

impl PartitionUpsertMetadataManager<ConcurrentMapKeyIndex> {
    /// Create a manager backed by the in-memory map index
    pub fn new(config: UpsertConfig) -> Result<Self> {
        Self::with_key_index(config, ConcurrentMapKeyIndex::new())
    }
}

impl<I: KeyIndex> PartitionUpsertMetadataManager<I> {
    /// Create a manager with a custom key index backend
    pub fn with_key_index(config: UpsertConfig, key_index: I) -> Result<Self> {
        let executor = TaskExecutor::new(
            format!("upsert-{}-{}", config.table_name, config.partition_id),
            config.preload_threads,
        )?;

        let is_preloading = config.preload_applicable();

        tracing::info!(
            table = %config.table_name,
            partition = config.partition_id,
            consistency = ?config.consistency_mode,
            hash_function = %config.hash_function,
            snapshot = config.enable_snapshot,
            preload = is_preloading,
            "Created partition upsert metadata manager"
        );

        Ok(Self {
            config,
            state: RwLock::new(PartitionState {
                key_index,
                largest_seen_comparison_value: None,
            }),
            tracked_segments: RwLock::new(HashMap::new()),
            upsert_view: RwLock::new(None),
            snapshot_lock: Mutex::new(()),
            is_preloading: AtomicBool::new(is_preloading),
            preload_claimed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            executor,
            assignment_source: None,
            preloader: None,
        })
    }

    /// Attach the segment assignment source used by preload
    pub fn with_assignment_source(mut self, source: Arc<dyn SegmentAssignmentSource>) -> Self {
        self.assignment_source = Some(source);
        self
    }

    /// Attach the segment preloader
    pub fn with_preloader(mut self, preloader: Arc<dyn SegmentPreloader>) -> Self {
        self.preloader = Some(preloader);
        self
    }

    // =========================================================================
    // Segment Tracking
    // =========================================================================

    /// Start tracking a segment whose upsert bitmaps are already registered
    pub fn track_segment(&self, segment: Arc<Segment>) -> Result<()> {
        if !segment.is_upsert_enabled() {
            return Err(UpsertError::UpsertNotEnabled(segment.name().to_string()));
        }
        tracing::debug!(segment = %segment.name(), id = %segment.id(), "Tracking segment");
        self.tracked_segments.write().insert(segment.id(), segment);
        Ok(())
    }

    pub(crate) fn untrack_segment(&self, segment: SegmentId) -> Option<Arc<Segment>> {
        self.tracked_segments.write().remove(&segment)
    }

    pub fn is_tracked(&self, segment: &Segment) -> bool {
        self.tracked_segments.read().contains_key(&segment.id())
    }

    pub fn tracked_segment_count(&self) -> usize {
        self.tracked_segments.read().len()
    }

    /// Point-in-time list of tracked segments
    pub fn tracked_segments(&self) -> Vec<Arc<Segment>> {
        self.tracked_segments.read().values().cloned().collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Whether startup preloading is still running
    pub fn is_preloading(&self) -> bool {
        self.is_preloading.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting mutations; snapshots and preload become no-ops
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!(
                table = %self.config.table_name,
                partition = self.config.partition_id,
                "Stopped partition upsert metadata manager"
            );
        }
    }

    /// Stop and tear down the background executor
    ///
    /// Queued and in-flight background tasks run to completion.
    pub fn close(&self) {
        self.stop();
        self.executor.shutdown();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &UpsertConfig {
        &self.config
    }

    pub fn partition_id(&self) -> u32 {
        self.config.partition_id
    }

    /// Number of primary keys in the key index
    pub fn num_primary_keys(&self) -> usize {
        self.state.read().key_index.len()
    }

    pub(crate) fn executor(&self) -> &TaskExecutor {
        &self.executor
    }
}
