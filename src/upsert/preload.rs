//! Startup preload of sealed segments from validDocIds snapshots
//!
//! ## Flow
//! 1. Select: ONLINE on this instance, this partition, metadata present and
//!    not in progress, snapshot file present
//! 2. Fan out `SegmentPreloader::preload` over the background executor
//! 3. Install each loaded segment via `preload_segment` on the calling thread
//! 4. Clear `is_preloading` exactly once
//!
//! Only the first caller runs these steps; concurrent or later callers get
//! an empty report.
//!
//! Preload only accelerates startup. A segment that fails to preload is
//! logged and left for the normal load path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use roaring::RoaringBitmap;

use crate::assignment::{
    segment_partition_id, SegmentAssignment, SegmentMetadata, SegmentState, SegmentStatus,
};
use crate::error::{Result, UpsertError};
use crate::index::KeyIndex;
use crate::record::RecordInfo;
use crate::segment::{
    segment_dir, segment_index_dir, snapshot, Segment, VALID_DOC_IDS_SNAPSHOT_FILE_NAME,
};

use super::PartitionUpsertMetadataManager;

/// A segment chosen for preload
#[derive(Debug, Clone)]
pub struct PreloadRequest {
    pub segment_name: String,
    pub segment_dir: PathBuf,
    pub index_dir: PathBuf,
    pub metadata: SegmentMetadata,
}

impl PreloadRequest {
    pub fn snapshot_path(&self) -> PathBuf {
        self.index_dir.join(VALID_DOC_IDS_SNAPSHOT_FILE_NAME)
    }
}

/// A segment loaded from its snapshot, ready to install
#[derive(Debug)]
pub struct PreloadedSegment {
    /// Sealed segment without upsert bitmaps yet
    pub segment: Arc<Segment>,

    /// validDocIds read from the snapshot
    pub valid_doc_ids: RoaringBitmap,

    /// Records for the valid docs
    pub records: Vec<RecordInfo>,
}

/// Loads one selected segment (runs on the background executor)
pub trait SegmentPreloader: Send + Sync {
    fn preload(&self, request: &PreloadRequest) -> Result<PreloadedSegment>;
}

/// Reads primary key, comparison value and delete flag for the given docs
/// of a sealed segment
pub trait SegmentRecordReader: Send + Sync {
    fn read_records(
        &self,
        request: &PreloadRequest,
        doc_ids: &RoaringBitmap,
    ) -> Result<Vec<RecordInfo>>;
}

/// Default preloader: snapshot file plus a record reader
pub struct SnapshotPreloader<R> {
    reader: R,
}

impl<R: SegmentRecordReader> SnapshotPreloader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: SegmentRecordReader> SegmentPreloader for SnapshotPreloader<R> {
    fn preload(&self, request: &PreloadRequest) -> Result<PreloadedSegment> {
        let valid_doc_ids = snapshot::read_snapshot(&request.snapshot_path())?;
        let records = self.reader.read_records(request, &valid_doc_ids)?;
        Ok(PreloadedSegment {
            segment: Segment::immutable(request.segment_name.clone(), request.index_dir.clone()),
            valid_doc_ids,
            records,
        })
    }
}

/// Why a segment was passed over during selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadSkip {
    NotAssigned,
    NotOnline(SegmentState),
    MissingMetadata,
    InProgress,
    UnknownPartition,
    OtherPartition(u32),
    NoSnapshot,
}

impl fmt::Display for PreloadSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreloadSkip::NotAssigned => write!(f, "not assigned to this instance"),
            PreloadSkip::NotOnline(state) => write!(f, "state is {}", state),
            PreloadSkip::MissingMetadata => write!(f, "no segment metadata"),
            PreloadSkip::InProgress => write!(f, "segment still in progress"),
            PreloadSkip::UnknownPartition => write!(f, "partition unknown"),
            PreloadSkip::OtherPartition(p) => write!(f, "belongs to partition {}", p),
            PreloadSkip::NoSnapshot => write!(f, "no validDocIds snapshot"),
        }
    }
}

/// Selection result, in segment name order
#[derive(Debug, Default)]
pub struct PreloadPlan {
    pub selected: Vec<PreloadRequest>,
    pub skipped: Vec<(String, PreloadSkip)>,
}

/// Decide which segments a partition should preload
pub fn plan_preload(
    assignment: &SegmentAssignment,
    metadata: &HashMap<String, SegmentMetadata>,
    instance_id: &str,
    partition_id: u32,
    table_data_dir: &Path,
) -> PreloadPlan {
    let mut names: Vec<&String> = assignment.keys().collect();
    names.sort();

    let mut plan = PreloadPlan::default();
    for name in names {
        let skip = |plan: &mut PreloadPlan, reason: PreloadSkip| {
            plan.skipped.push((name.clone(), reason))
        };

        match assignment[name].get(instance_id) {
            Some(SegmentState::Online) => {}
            Some(other) => {
                skip(&mut plan, PreloadSkip::NotOnline(*other));
                continue;
            }
            None => {
                skip(&mut plan, PreloadSkip::NotAssigned);
                continue;
            }
        }

        let meta = match metadata.get(name) {
            Some(meta) => meta,
            None => {
                skip(&mut plan, PreloadSkip::MissingMetadata);
                continue;
            }
        };
        if meta.status == SegmentStatus::InProgress {
            skip(&mut plan, PreloadSkip::InProgress);
            continue;
        }

        match segment_partition_id(name, Some(meta)) {
            Some(p) if p == partition_id => {}
            Some(p) => {
                skip(&mut plan, PreloadSkip::OtherPartition(p));
                continue;
            }
            None => {
                skip(&mut plan, PreloadSkip::UnknownPartition);
                continue;
            }
        }

        let request = PreloadRequest {
            segment_name: name.clone(),
            segment_dir: segment_dir(table_data_dir, name),
            index_dir: segment_index_dir(table_data_dir, name),
            metadata: meta.clone(),
        };
        if request.snapshot_path().is_file() {
            plan.selected.push(request);
        } else {
            skip(&mut plan, PreloadSkip::NoSnapshot);
        }
    }
    plan
}

/// Outcome of a preload pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub preloaded: Vec<String>,
    pub skipped_no_snapshot: Vec<String>,
    pub failed: Vec<String>,
}

impl<I: KeyIndex> PartitionUpsertMetadataManager<I> {
    /// Preload this partition's sealed segments from their snapshots
    ///
    /// Runs at most once. Any other call, including one racing the running
    /// preload, returns an empty report at once while `is_preloading` stays
    /// true until the running preload finishes. The running call blocks until
    /// every selected segment is installed or has failed.
    pub fn preload_segments(&self) -> Result<PreloadReport> {
        if !self.is_preloading() || !self.claim_preload() {
            return Ok(PreloadReport::default());
        }

        let result = if self.is_stopped() {
            Ok(PreloadReport::default())
        } else {
            self.do_preload_segments()
        };
        self.finish_preloading();
        result
    }

    fn claim_preload(&self) -> bool {
        let claimed = self
            .preload_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            tracing::debug!(
                partition = self.config.partition_id,
                "Preload already claimed by another caller"
            );
        }
        claimed
    }

    fn finish_preloading(&self) {
        if self.is_preloading.swap(false, Ordering::AcqRel) {
            tracing::info!(partition = self.config.partition_id, "Preload finished");
        }
    }

    fn do_preload_segments(&self) -> Result<PreloadReport> {
        let (source, preloader) = match (&self.assignment_source, &self.preloader) {
            (Some(source), Some(preloader)) => (source, preloader),
            _ => {
                tracing::warn!(
                    partition = self.config.partition_id,
                    "No assignment source or preloader attached, skipping preload"
                );
                return Ok(PreloadReport::default());
            }
        };

        let plan = plan_preload(
            &source.segment_assignment()?,
            &source.segments_metadata()?,
            &self.config.instance_id,
            self.config.partition_id,
            &self.config.table_data_dir,
        );

        let mut report = PreloadReport::default();
        for (name, reason) in &plan.skipped {
            if *reason == PreloadSkip::NoSnapshot {
                report.skipped_no_snapshot.push(name.clone());
            }
            tracing::debug!(segment = %name, reason = %reason, "Not preloading segment");
        }

        tracing::info!(
            partition = self.config.partition_id,
            segments = plan.selected.len(),
            "Preloading segments"
        );

        let mut pending = Vec::with_capacity(plan.selected.len());
        for request in plan.selected {
            let preloader = Arc::clone(preloader);
            let name = request.segment_name.clone();
            let handle = self.executor().submit(move || preloader.preload(&request));
            pending.push((name, handle));
        }

        for (name, handle) in pending {
            let installed = handle
                .and_then(|h| h.join())
                .and_then(|loaded| loaded)
                .and_then(|loaded| self.preload_segment(loaded));

            match installed {
                Ok(keys) => {
                    tracing::debug!(segment = %name, keys, "Segment preloaded");
                    report.preloaded.push(name);
                }
                Err(e) => {
                    let e = UpsertError::Preload {
                        segment: name.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %e, "Preload failed, segment falls back to full load");
                    report.failed.push(name);
                }
            }
        }

        tracing::info!(
            partition = self.config.partition_id,
            preloaded = report.preloaded.len(),
            skipped_no_snapshot = report.skipped_no_snapshot.len(),
            failed = report.failed.len(),
            "Preload round complete"
        );
        Ok(report)
    }
}

impl<I: KeyIndex + 'static> PartitionUpsertMetadataManager<I> {
    /// Run `preload_segments` on a dedicated thread
    ///
    /// The per-segment work still fans out over the background executor.
    pub fn start_preload(self: &Arc<Self>) -> Result<JoinHandle<Result<PreloadReport>>> {
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("upsert-preload-{}", self.config.partition_id))
            .spawn(move || manager.preload_segments())?;
        Ok(handle)
    }
}
