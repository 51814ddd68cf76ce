//! Growing-segment writes: offset reservation, insert and delete.

use super::Segment;
use crate::dispatch::QueryContext;
use crate::error::{CoreError, CoreResult};
use crate::metrics::OperationKind;
use crate::types::{id_set_from_keys, PrimaryKey, SegmentType, Timestamp};
use segnode_codec::InsertRecord;
use std::borrow::Cow;
use std::sync::atomic::Ordering;
use tracing::debug;

impl Segment {
    /// Reserves `num_rows` row offsets and returns the first.
    ///
    /// Sealed segments reserve nothing and return 0.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unhealthy`] after destruction, or
    /// [`CoreError::Engine`] if the engine refuses.
    pub fn pre_insert(&self, num_rows: i64) -> CoreResult<i64> {
        let state = self.state.read();
        if state.segment_type != SegmentType::Growing {
            return Ok(0);
        }
        let engine = self.healthy_engine(&state)?;

        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::PreInsert,
            &QueryContext::background(),
            move || engine.pre_insert(num_rows),
        )?
        .map_err(|status| status.into_error("PreInsert"))
    }

    /// Inserts a batch of rows at `offset`.
    ///
    /// On success the entity counter grows by the row count and the segment
    /// is marked recently modified.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalState`] if the segment is not growing
    /// - [`CoreError::InvalidInput`] if the batch is empty or its lengths disagree
    /// - [`CoreError::Unhealthy`] after destruction
    /// - [`CoreError::Engine`] if the engine rejects the batch
    pub fn insert(
        &self,
        offset: i64,
        row_ids: &[i64],
        timestamps: &[Timestamp],
        record: &InsertRecord,
    ) -> CoreResult<()> {
        let state = self.state.read();
        if state.segment_type != SegmentType::Growing {
            return Err(CoreError::illegal_state(format!(
                "unexpected segment type {} for insert into segment {}",
                state.segment_type,
                self.id()
            )));
        }
        let engine = self.healthy_engine(&state)?;

        if row_ids.is_empty() {
            return Err(CoreError::invalid_input("empty rows to insert"));
        }
        if row_ids.len() != timestamps.len() || record.num_rows != row_ids.len() as i64 {
            return Err(CoreError::invalid_input(format!(
                "{} row ids, {} timestamps and {} record rows",
                row_ids.len(),
                timestamps.len(),
                record.num_rows
            )));
        }
        let blob = segnode_codec::encode(record)?;

        let num_rows = row_ids.len() as i64;
        let row_ids = row_ids.to_vec();
        let timestamps = timestamps.to_vec();
        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::Insert,
            &QueryContext::background(),
            move || engine.insert(offset, &row_ids, &timestamps, &blob),
        )?
        .map_err(|status| status.into_error("Insert"))?;

        self.runtime
            .metrics
            .add_entities(self.entity_labels(state.segment_type), num_rows);
        self.recently_modified.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Deletes `pks` as of `timestamps`.
    ///
    /// Before the first [`Segment::flush_delete`] the pairs are only
    /// buffered; afterwards they are applied directly.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidInput`] for empty or mismatched input
    /// - [`CoreError::Unhealthy`] after destruction
    /// - otherwise as the direct application path
    pub fn delete(&self, pks: &[PrimaryKey], timestamps: &[Timestamp]) -> CoreResult<()> {
        check_delete_input(pks, timestamps)?;
        self.ensure_healthy()?;

        if self.delete_buffer.try_append(pks, timestamps)? {
            return Ok(());
        }
        self.delete_impl(pks, timestamps)
    }

    /// Drains buffered deletes into the engine in timestamp order.
    ///
    /// Marks the buffer flushed even when it was empty. After a failure the
    /// buffer keeps its records and the flush can be retried.
    ///
    /// # Errors
    ///
    /// As the direct application path.
    pub fn flush_delete(&self) -> CoreResult<()> {
        self.delete_buffer.flush(|pks, timestamps| {
            if pks.is_empty() {
                return Ok(());
            }
            self.delete_impl(pks, timestamps)
        })
    }

    /// Highest delete timestamp applied to the engine.
    #[must_use]
    pub fn flushed_delete_timestamp(&self) -> Timestamp {
        *self.flushed_delete_ts.lock()
    }

    /// Whether buffered deletes have been flushed.
    #[must_use]
    pub fn is_delete_flushed(&self) -> bool {
        self.delete_buffer.is_flushed()
    }

    /// Applies deletes directly, skipping those at or below the watermark.
    ///
    /// Input is expected sorted by timestamp; unsorted input is sorted
    /// (stably) first.
    pub(super) fn delete_impl(&self, pks: &[PrimaryKey], timestamps: &[Timestamp]) -> CoreResult<()> {
        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;

        let (pks, timestamps) = sorted_by_timestamp(pks, timestamps);
        let mut watermark = self.flushed_delete_ts.lock();
        let start = timestamps.partition_point(|&ts| ts <= *watermark);
        if start == timestamps.len() {
            debug!(
                segment_id = self.id(),
                watermark = *watermark,
                "all delete records already applied"
            );
            return Ok(());
        }

        let ids = id_set_from_keys(&pks[start..])?;
        let blob = segnode_codec::encode(&ids)?;
        let applied = timestamps[start..].to_vec();
        let last = applied[applied.len() - 1];

        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::Delete,
            &QueryContext::background(),
            move || engine.delete(&blob, &applied),
        )?
        .map_err(|status| status.into_error("Delete"))?;

        *watermark = last;
        Ok(())
    }
}

/// Rejects empty or mismatched delete input.
pub(super) fn check_delete_input(pks: &[PrimaryKey], timestamps: &[Timestamp]) -> CoreResult<()> {
    if pks.is_empty() {
        return Err(CoreError::invalid_input("empty pks to delete"));
    }
    if pks.len() != timestamps.len() {
        return Err(CoreError::invalid_input(
            "length of pks not equal to length of timestamps",
        ));
    }
    Ok(())
}

fn sorted_by_timestamp<'a>(
    pks: &'a [PrimaryKey],
    timestamps: &'a [Timestamp],
) -> (Cow<'a, [PrimaryKey]>, Cow<'a, [Timestamp]>) {
    if timestamps.is_sorted() {
        return (Cow::Borrowed(pks), Cow::Borrowed(timestamps));
    }
    let mut pairs: Vec<(PrimaryKey, Timestamp)> =
        pks.iter().cloned().zip(timestamps.iter().copied()).collect();
    pairs.sort_by_key(|(_, ts)| *ts);
    let (pks, timestamps): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    (Cow::Owned(pks), Cow::Owned(timestamps))
}
