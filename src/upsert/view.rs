//! Consistency-controlled query views
//!
//! ## Modes
//! - **NONE**: clone each segment's queryable bitmap under that segment's
//!   own lock. No cross-segment atomicity.
//! - **SYNC**: clone every bitmap while holding the partition write lock,
//!   released as soon as the copies exist.
//! - **SNAPSHOT**: serve a cached `UpsertView`; rebuild it under the write
//!   lock once it is older than the refresh interval (or than the per-query
//!   freshness override). Rebuilds are double-checked so racing queries do
//!   not rebuild twice.
//!
//! Every mode hands out copies; the live bitmaps never leave their segment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use roaring::RoaringBitmap;

use crate::config::{ConsistencyMode, UPSERT_VIEW_FRESHNESS_MS_OPTION};
use crate::index::KeyIndex;
use crate::segment::{Segment, SegmentContext, SegmentId};

use super::PartitionUpsertMetadataManager;

/// Cached per-segment copies of queryable bitmaps at one instant
#[derive(Debug)]
pub struct UpsertView {
    built_at: Instant,
    bitmaps: HashMap<SegmentId, Arc<RoaringBitmap>>,
}

impl UpsertView {
    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    pub fn segment_bitmap(&self, segment: SegmentId) -> Option<&Arc<RoaringBitmap>> {
        self.bitmaps.get(&segment)
    }

    pub fn segment_count(&self) -> usize {
        self.bitmaps.len()
    }

    fn is_fresh(&self, max_age_ms: u64) -> bool {
        self.age() < Duration::from_millis(max_age_ms)
    }
}

/// Copy of a segment's queryable bitmap, taken under the segment's own lock
fn clone_query_bitmap(segment: &Segment) -> Option<Arc<RoaringBitmap>> {
    segment.query_bitmap().map(|b| Arc::new(b.snapshot()))
}

impl<I: KeyIndex> PartitionUpsertMetadataManager<I> {
    /// Fill query-time bitmap snapshots for the given contexts
    ///
    /// Contexts for segments that are not (or no longer) tracked are dropped
    /// from the list.
    pub fn set_segment_contexts(
        &self,
        contexts: &mut Vec<SegmentContext>,
        query_options: &HashMap<String, String>,
    ) {
        {
            let tracked = self.tracked_segments.read();
            contexts.retain(|c| tracked.contains_key(&c.segment().id()));
        }

        match self.config.consistency_mode {
            ConsistencyMode::None => Self::fill_contexts(contexts),
            ConsistencyMode::Sync => {
                let _partition = self.state.write();
                Self::fill_contexts(contexts);
            }
            ConsistencyMode::Snapshot => {
                let max_age_ms = self.view_freshness_ms(query_options);
                let view = self.upsert_view(max_age_ms, contexts);
                for context in contexts.iter_mut() {
                    if let Some(bitmap) = view.segment_bitmap(context.segment().id()) {
                        context.set_queryable_doc_ids_snapshot(Arc::clone(bitmap));
                    }
                }
            }
        }
    }

    /// Contexts covering every tracked segment
    pub fn segment_contexts(&self, query_options: &HashMap<String, String>) -> Vec<SegmentContext> {
        let mut contexts: Vec<SegmentContext> = self
            .tracked_segments()
            .into_iter()
            .map(SegmentContext::new)
            .collect();
        self.set_segment_contexts(&mut contexts, query_options);
        contexts
    }

    fn fill_contexts(contexts: &mut [SegmentContext]) {
        for context in contexts.iter_mut() {
            if let Some(bitmap) = clone_query_bitmap(context.segment()) {
                context.set_queryable_doc_ids_snapshot(bitmap);
            }
        }
    }

    /// Max view age for this query: the freshness override when given,
    /// otherwise the configured refresh interval
    fn view_freshness_ms(&self, query_options: &HashMap<String, String>) -> u64 {
        match query_options.get(UPSERT_VIEW_FRESHNESS_MS_OPTION) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => ms,
                Err(_) => {
                    tracing::warn!(
                        option = UPSERT_VIEW_FRESHNESS_MS_OPTION,
                        value = %raw,
                        "Ignoring invalid upsert view freshness override"
                    );
                    self.config.upsert_view_refresh_interval_ms
                }
            },
            None => self.config.upsert_view_refresh_interval_ms,
        }
    }

    /// Current cached view, rebuilt if older than `max_age_ms` or missing a
    /// requested segment
    pub(crate) fn upsert_view(&self, max_age_ms: u64, contexts: &[SegmentContext]) -> Arc<UpsertView> {
        let covers = |view: &UpsertView| {
            contexts
                .iter()
                .all(|c| view.bitmaps.contains_key(&c.segment().id()))
        };

        // Fast path: no partition lock, no copy
        let cached = self.upsert_view.read().clone();
        if let Some(view) = &cached {
            if view.is_fresh(max_age_ms) && covers(&**view) {
                return Arc::clone(view);
            }
        }

        let requested_at = Instant::now();
        let _partition = self.state.write();

        // Another query may have rebuilt while we waited for the lock
        let cached = self.upsert_view.read().clone();
        if let Some(view) = &cached {
            let rebuilt_since_request = view.built_at > requested_at;
            if (rebuilt_since_request || view.is_fresh(max_age_ms)) && covers(&**view) {
                return Arc::clone(view);
            }
            if rebuilt_since_request || view.is_fresh(max_age_ms) {
                // Fresh but missing newly tracked segments: extend this generation
                return self.extend_view_locked(view);
            }
        }

        self.rebuild_view_locked()
    }

    /// Rebuild the cached view if it is older than `max_age_ms`
    /// (partition write lock held by the caller)
    pub(crate) fn rebuild_view_if_older_than_locked(&self, max_age_ms: u64) {
        let stale = match self.upsert_view.read().as_ref() {
            Some(view) => !view.is_fresh(max_age_ms),
            None => false,
        };
        if stale {
            self.rebuild_view_locked();
        }
    }

    /// Clone every tracked segment's queryable bitmap into a new generation
    /// (partition write lock held by the caller)
    fn rebuild_view_locked(&self) -> Arc<UpsertView> {
        let bitmaps = self
            .tracked_segments()
            .iter()
            .filter_map(|segment| clone_query_bitmap(segment).map(|b| (segment.id(), b)))
            .collect();

        let view = Arc::new(UpsertView {
            built_at: Instant::now(),
            bitmaps,
        });
        *self.upsert_view.write() = Some(Arc::clone(&view));

        tracing::debug!(segments = view.segment_count(), "Rebuilt upsert view");
        view
    }

    /// Same generation plus copies for tracked segments it lacks; bitmaps of
    /// segments already in the view are shared, untracked ones are pruned
    /// (partition write lock held by the caller)
    fn extend_view_locked(&self, base: &UpsertView) -> Arc<UpsertView> {
        let bitmaps = self
            .tracked_segments()
            .iter()
            .filter_map(|segment| match base.bitmaps.get(&segment.id()) {
                Some(existing) => Some((segment.id(), Arc::clone(existing))),
                None => clone_query_bitmap(segment).map(|b| (segment.id(), b)),
            })
            .collect();

        let view = Arc::new(UpsertView {
            built_at: base.built_at,
            bitmaps,
        });
        *self.upsert_view.write() = Some(Arc::clone(&view));
        view
    }
}
