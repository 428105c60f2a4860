//! Key index mutation path
//!
//! Every operation here holds the partition write lock for its whole
//! duration, so SYNC views and SNAPSHOT rebuilds observe either none or all
//! of its bitmap changes.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::bitmap::ThreadSafeBitmap;
use crate::config::ConsistencyMode;
use crate::error::{Result, UpsertError};
use crate::index::{KeyIndex, RecordLocation};
use crate::record::{resolve_comparison_ties, DocId, HashedKey, RecordInfo};
use crate::segment::Segment;

use super::{PartitionState, PartitionUpsertMetadataManager, PreloadedSegment};

/// Set a doc in validDocIds and, unless it is a delete, in queryableDocIds
fn add_doc_id(
    valid_doc_ids: &ThreadSafeBitmap,
    queryable_doc_ids: Option<&ThreadSafeBitmap>,
    doc_id: DocId,
    is_delete: bool,
) {
    valid_doc_ids.add(doc_id);
    if let Some(queryable) = queryable_doc_ids {
        if is_delete {
            queryable.remove(doc_id);
        } else {
            queryable.add(doc_id);
        }
    }
}

/// Clear a doc from both bitmaps of a segment
fn remove_doc_id(segment: &Segment, doc_id: DocId) {
    if let Some(valid) = segment.valid_doc_ids() {
        valid.remove(doc_id);
    }
    if let Some(queryable) = segment.queryable_doc_ids() {
        queryable.remove(doc_id);
    }
}

impl<I: KeyIndex> PartitionUpsertMetadataManager<I> {
    fn hash_key(&self, record: &RecordInfo) -> Result<HashedKey> {
        record.primary_key.hashed(self.config.hash_function)
    }

    /// Deduplicate a batch and hash its keys, outside the partition lock
    fn prepare_batch<R>(&self, records: R) -> Result<Vec<(HashedKey, RecordInfo)>>
    where
        R: IntoIterator<Item = RecordInfo>,
    {
        resolve_comparison_ties(records, self.config.hash_function)?
            .into_iter()
            .map(|r| self.hash_key(&r).map(|k| (k, r)))
            .collect()
    }

    fn reject_if_stopped(&self, operation: &str, segment: &Segment) -> bool {
        if self.is_stopped() {
            tracing::warn!(
                segment = %segment.name(),
                operation,
                "Manager is stopped, skipping upsert metadata mutation"
            );
            return true;
        }
        false
    }

    /// Offer one record to the key index (partition lock held)
    ///
    /// The record wins when its key is new or its comparison value is not
    /// lower than the current winner's; equal values go to the newcomer.
    fn add_record_locked(
        state: &mut PartitionState<I>,
        segment: &Arc<Segment>,
        key: HashedKey,
        record: &RecordInfo,
    ) -> bool {
        state.observe(&record.comparison_value);

        if let Some(current) = state.key_index.get(&key) {
            let order = record
                .comparison_value
                .compare_value(&current.comparison_value);
            if order == Ordering::Less {
                return false;
            }
            remove_doc_id(&current.segment, current.doc_id);
        }

        if let Some(valid) = segment.valid_doc_ids() {
            add_doc_id(
                valid,
                segment.queryable_doc_ids().map(|q| q.as_ref()),
                record.doc_id,
                record.is_delete,
            );
        }
        state.key_index.insert(
            key,
            RecordLocation::new(
                Arc::clone(segment),
                record.doc_id,
                record.comparison_value.clone(),
            ),
        );
        true
    }

    /// Add one ingested record
    ///
    /// Returns whether the record became the winner of its primary key.
    pub fn add_record(&self, segment: &Arc<Segment>, record: &RecordInfo) -> Result<bool> {
        if self.reject_if_stopped("add_record", segment) {
            return Ok(false);
        }
        if !segment.is_upsert_enabled() {
            return Err(UpsertError::UpsertNotEnabled(segment.name().to_string()));
        }
        let key = self.hash_key(record)?;

        let mut state = self.state.write();
        let won = Self::add_record_locked(&mut state, segment, key, record);
        self.refresh_view_if_stale_locked();
        Ok(won)
    }

    /// Add one ingestion batch: ties are resolved first, then every surviving
    /// record is offered under a single write lock acquisition.
    ///
    /// Returns how many records became winners.
    pub fn add_records<R>(&self, segment: &Arc<Segment>, records: R) -> Result<usize>
    where
        R: IntoIterator<Item = RecordInfo>,
    {
        if self.reject_if_stopped("add_records", segment) {
            return Ok(0);
        }
        if !segment.is_upsert_enabled() {
            return Err(UpsertError::UpsertNotEnabled(segment.name().to_string()));
        }

        let keyed = self.prepare_batch(records)?;

        let mut state = self.state.write();
        let mut won = 0;
        for (key, record) in keyed {
            if Self::add_record_locked(&mut state, segment, key, &record) {
                won += 1;
            }
        }
        self.refresh_view_if_stale_locked();
        Ok(won)
    }

    /// Move a winning row from `(old_segment, old_doc_id)` to
    /// `(segment, new_doc_id)`.
    ///
    /// Used when a segment is superseded, e.g. a consuming segment sealed into
    /// an immutable one. The bitmaps of `segment` are passed explicitly since
    /// the new segment may not be registered yet. The new bit is set and the
    /// index repointed only when the old location is still the key's winner
    /// (or the key is unknown).
    #[allow(clippy::too_many_arguments)]
    pub fn replace_doc_id(
        &self,
        segment: &Arc<Segment>,
        valid_doc_ids: &ThreadSafeBitmap,
        queryable_doc_ids: Option<&ThreadSafeBitmap>,
        old_segment: &Arc<Segment>,
        old_doc_id: DocId,
        new_doc_id: DocId,
        record: &RecordInfo,
    ) -> Result<()> {
        if self.reject_if_stopped("replace_doc_id", segment) {
            return Ok(());
        }
        let key = self.hash_key(record)?;

        let mut state = self.state.write();
        remove_doc_id(old_segment, old_doc_id);

        // A newer winner elsewhere keeps its bit; the moved row stays invalid
        let moves_winner = state
            .key_index
            .get(&key)
            .map(|loc| loc.is_at(old_segment.id(), old_doc_id))
            .unwrap_or(true);
        if moves_winner {
            add_doc_id(valid_doc_ids, queryable_doc_ids, new_doc_id, record.is_delete);
            state.observe(&record.comparison_value);
            state.key_index.insert(
                key,
                RecordLocation::new(
                    Arc::clone(segment),
                    new_doc_id,
                    record.comparison_value.clone(),
                ),
            );
        }

        self.refresh_view_if_stale_locked();
        Ok(())
    }

    /// Register and track a sealed segment, offering each of its records
    pub fn add_segment<R>(&self, segment: &Arc<Segment>, records: R) -> Result<usize>
    where
        R: IntoIterator<Item = RecordInfo>,
    {
        if self.reject_if_stopped("add_segment", segment) {
            return Ok(0);
        }
        if !segment.is_upsert_enabled() {
            return Err(UpsertError::UpsertNotEnabled(segment.name().to_string()));
        }

        let keyed = self.prepare_batch(records)?;

        let mut state = self.state.write();
        let mut won = 0;
        for (key, record) in keyed {
            if Self::add_record_locked(&mut state, segment, key, &record) {
                won += 1;
            }
        }
        self.track_segment(Arc::clone(segment))?;
        self.refresh_view_if_stale_locked();
        drop(state);

        tracing::info!(
            segment = %segment.name(),
            winners = won,
            primary_keys = self.num_primary_keys(),
            "Added segment"
        );
        Ok(won)
    }

    /// Replace `old_segment` with `segment` (same rows, new storage)
    ///
    /// Keys whose winner lives in the old segment move to the new one without
    /// a comparison; other keys follow the normal comparison rule. The old
    /// segment is untracked afterwards and keys still pointing at it are
    /// dropped.
    pub fn replace_segment<R>(
        &self,
        segment: &Arc<Segment>,
        records: R,
        old_segment: &Arc<Segment>,
    ) -> Result<usize>
    where
        R: IntoIterator<Item = RecordInfo>,
    {
        if self.reject_if_stopped("replace_segment", segment) {
            return Ok(0);
        }
        if !segment.is_upsert_enabled() {
            return Err(UpsertError::UpsertNotEnabled(segment.name().to_string()));
        }

        let keyed = self.prepare_batch(records)?;

        let mut state = self.state.write();
        let mut won = 0;
        for (key, record) in keyed {
            let moved_from_old = match state.key_index.get(&key) {
                Some(current) if current.segment.id() == old_segment.id() => Some(current.doc_id),
                _ => None,
            };

            match moved_from_old {
                Some(old_doc_id) => {
                    remove_doc_id(old_segment, old_doc_id);
                    if let Some(valid) = segment.valid_doc_ids() {
                        add_doc_id(
                            valid,
                            segment.queryable_doc_ids().map(|q| q.as_ref()),
                            record.doc_id,
                            record.is_delete,
                        );
                    }
                    state.observe(&record.comparison_value);
                    state.key_index.insert(
                        key,
                        RecordLocation::new(
                            Arc::clone(segment),
                            record.doc_id,
                            record.comparison_value.clone(),
                        ),
                    );
                    won += 1;
                }
                None => {
                    if Self::add_record_locked(&mut state, segment, key, &record) {
                        won += 1;
                    }
                }
            }
        }

        self.untrack_segment(old_segment.id());
        let dropped = state.key_index.remove_segment(old_segment.id());
        self.track_segment(Arc::clone(segment))?;
        self.refresh_view_if_stale_locked();
        drop(state);

        if dropped > 0 {
            tracing::warn!(
                segment = %segment.name(),
                old_segment = %old_segment.name(),
                dropped,
                "Primary keys left in replaced segment were dropped"
            );
        }
        tracing::info!(
            segment = %segment.name(),
            old_segment = %old_segment.name(),
            winners = won,
            "Replaced segment"
        );
        Ok(won)
    }

    /// Install a segment loaded from its validDocIds snapshot
    ///
    /// The snapshot is already conflict-free, so its records go straight into
    /// the key index without comparison. A key that somehow already has a
    /// winner elsewhere loses that bit to keep one winner per key.
    pub fn preload_segment(&self, preloaded: PreloadedSegment) -> Result<usize> {
        let PreloadedSegment {
            segment,
            valid_doc_ids,
            records,
        } = preloaded;

        if self.reject_if_stopped("preload_segment", &segment) {
            return Ok(0);
        }

        let deleted: HashSet<DocId> = records
            .iter()
            .filter(|r| r.is_delete)
            .map(|r| r.doc_id)
            .collect();
        let mut queryable = valid_doc_ids.clone();
        for doc_id in &deleted {
            queryable.remove(*doc_id);
        }

        segment.enable_upsert(
            Arc::new(ThreadSafeBitmap::from_bitmap(valid_doc_ids.clone())),
            Some(Arc::new(ThreadSafeBitmap::from_bitmap(queryable))),
        )?;

        let keyed = records
            .into_iter()
            .filter(|r| valid_doc_ids.contains(r.doc_id))
            .map(|r| self.hash_key(&r).map(|k| (k, r)))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.write();
        let mut installed = 0;
        for (key, record) in keyed {
            state.observe(&record.comparison_value);
            let displaced = state.key_index.insert(
                key,
                RecordLocation::new(
                    Arc::clone(&segment),
                    record.doc_id,
                    record.comparison_value.clone(),
                ),
            );
            if let Some(previous) = displaced {
                if previous.segment.id() != segment.id() {
                    remove_doc_id(&previous.segment, previous.doc_id);
                }
            }
            installed += 1;
        }
        self.track_segment(Arc::clone(&segment))?;
        self.refresh_view_if_stale_locked();
        drop(state);

        tracing::debug!(segment = %segment.name(), keys = installed, "Preloaded segment");
        Ok(installed)
    }

    /// Unregister a segment
    ///
    /// Keys whose winner lives in the segment are dropped, not reassigned.
    /// Returns how many keys were dropped.
    pub fn remove_segment(&self, segment: &Arc<Segment>) -> usize {
        let mut state = self.state.write();
        self.untrack_segment(segment.id());
        let dropped = state.key_index.remove_segment(segment.id());
        self.refresh_view_if_stale_locked();
        drop(state);

        tracing::info!(segment = %segment.name(), dropped, "Removed segment");
        dropped
    }

    /// Look up the row a new version of this key would replace
    ///
    /// Used by partial upserts to merge the incoming row with the previous one.
    pub fn update_record(&self, record: &RecordInfo) -> Result<Option<RecordLocation>> {
        let key = self.hash_key(record)?;
        Ok(self.state.read().key_index.get(&key).cloned())
    }

    /// Drop index entries whose comparison value fell out of the metadata TTL
    ///
    /// Bitmaps are untouched; the TTL only bounds key index memory. Returns
    /// how many keys were dropped.
    pub fn remove_expired_primary_keys(&self) -> usize {
        let ttl = match self.config.metadata_ttl {
            Some(ttl) => ttl,
            None => return 0,
        };

        let mut state = self.state.write();
        let largest = match state.largest_seen_comparison_value {
            Some(v) => v,
            None => return 0,
        };
        let threshold = largest - ttl;

        let before = state.key_index.len();
        state.key_index.retain(&mut |_, location| {
            location
                .comparison_value
                .as_f64()
                .map(|v| v >= threshold)
                .unwrap_or(true)
        });
        let dropped = before - state.key_index.len();
        drop(state);

        if dropped > 0 {
            tracing::info!(dropped, threshold, "Removed expired primary keys");
        }
        dropped
    }

    /// In SNAPSHOT mode, rebuild a stale view while the write lock is held
    fn refresh_view_if_stale_locked(&self) {
        if self.config.consistency_mode == ConsistencyMode::Snapshot {
            self.rebuild_view_if_older_than_locked(self.config.upsert_view_refresh_interval_ms);
        }
    }
}
