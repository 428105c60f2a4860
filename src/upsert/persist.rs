//! validDocIds snapshot rounds

use std::sync::Arc;

use crate::error::Result;
use crate::executor::TaskHandle;
use crate::index::KeyIndex;
use crate::segment::Segment;

use super::PartitionUpsertMetadataManager;

/// Outcome of one snapshot round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Segments written, in write order
    pub persisted: Vec<String>,

    /// Segments whose write failed
    pub failed: Vec<String>,

    /// Mutable segments passed over
    pub skipped_mutable: usize,
}

impl<I: KeyIndex> PartitionUpsertMetadataManager<I> {
    /// Persist validDocIds of every tracked immutable segment
    ///
    /// No-op when snapshots are disabled or the manager is stopped. One
    /// round runs at a time; a concurrent caller waits for the current round.
    pub fn take_snapshot(&self) -> SnapshotReport {
        if !self.config.enable_snapshot || self.is_stopped() {
            return SnapshotReport::default();
        }

        let _round = self.snapshot_lock.lock();
        self.do_take_snapshot()
    }

    /// Segments that already have a snapshot file are written first, so a
    /// frequently rewritten segment never sits without one for long. Never
    /// takes the partition lock.
    fn do_take_snapshot(&self) -> SnapshotReport {
        let mut report = SnapshotReport::default();

        let mut with_snapshot: Vec<Arc<Segment>> = Vec::new();
        let mut without_snapshot: Vec<Arc<Segment>> = Vec::new();
        for segment in self.tracked_segments() {
            if segment.is_mutable() {
                report.skipped_mutable += 1;
            } else if segment.has_valid_doc_ids_snapshot() {
                with_snapshot.push(segment);
            } else {
                without_snapshot.push(segment);
            }
        }

        for segment in with_snapshot.iter().chain(without_snapshot.iter()) {
            match segment.persist_valid_doc_ids_snapshot() {
                Ok(()) => report.persisted.push(segment.name().to_string()),
                Err(e) => {
                    tracing::error!(
                        segment = %segment.name(),
                        error = %e,
                        "Failed to persist validDocIds snapshot"
                    );
                    report.failed.push(segment.name().to_string());
                }
            }
        }

        tracing::info!(
            partition = self.config.partition_id,
            persisted = report.persisted.len(),
            failed = report.failed.len(),
            skipped_mutable = report.skipped_mutable,
            "Finished validDocIds snapshot round"
        );
        report
    }
}

impl<I: KeyIndex + 'static> PartitionUpsertMetadataManager<I> {
    /// Run `take_snapshot` on the background executor
    pub fn submit_snapshot(self: &Arc<Self>) -> Result<TaskHandle<SnapshotReport>> {
        let manager = Arc::clone(self);
        self.executor().submit(move || manager.take_snapshot())
    }
}
