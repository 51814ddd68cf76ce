//! Tombstones buffered until a segment's first delete flush.
//!
//! Deletes can arrive before the engine is ready to take them. They are
//! held here, then handed over once, sorted by timestamp. After that the
//! buffer refuses new records and callers apply deletes directly.

use crate::error::{CoreError, CoreResult};
use crate::types::{PrimaryKey, Timestamp};
use parking_lot::Mutex;

/// A pending delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecord {
    /// Deleted key.
    pub pk: PrimaryKey,
    /// Delete timestamp.
    pub timestamp: Timestamp,
}

#[derive(Debug, Default)]
struct BufferState {
    records: Vec<DeleteRecord>,
    flushed: bool,
}

/// Pre-flush delete buffer.
#[derive(Debug, Default)]
pub struct DeleteBuffer {
    state: Mutex<BufferState>,
}

impl DeleteBuffer {
    /// Creates an empty, unflushed buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers the pairs `(pks[i], timestamps[i])`.
    ///
    /// Returns `Ok(false)`, buffering nothing, once the buffer has been
    /// flushed, whatever the input.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if the buffer is still open and
    /// the slices differ in length.
    pub fn try_append(&self, pks: &[PrimaryKey], timestamps: &[Timestamp]) -> CoreResult<bool> {
        let mut state = self.state.lock();
        if state.flushed {
            return Ok(false);
        }
        if pks.len() != timestamps.len() {
            return Err(CoreError::invalid_input(
                "length of pks not equal to length of timestamps",
            ));
        }
        state
            .records
            .extend(pks.iter().zip(timestamps).map(|(pk, &timestamp)| DeleteRecord {
                pk: pk.clone(),
                timestamp,
            }));
        Ok(true)
    }

    /// Drops buffered records and stops buffering, without a flush.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.records = Vec::new();
        state.flushed = true;
    }

    /// Sorts buffered records by timestamp and hands them to `apply`.
    ///
    /// Records with equal timestamps keep their arrival order. `apply` runs
    /// once, even with nothing buffered. On success the buffer is emptied
    /// and permanently marked flushed; on failure it is left as is and the
    /// flush may be retried.
    ///
    /// # Errors
    ///
    /// Returns whatever `apply` returns.
    pub fn flush<F>(&self, apply: F) -> CoreResult<()>
    where
        F: FnOnce(&[PrimaryKey], &[Timestamp]) -> CoreResult<()>,
    {
        let mut state = self.state.lock();
        state.records.sort_by_key(|r| r.timestamp);

        let (pks, timestamps): (Vec<PrimaryKey>, Vec<Timestamp>) = state
            .records
            .iter()
            .map(|r| (r.pk.clone(), r.timestamp))
            .unzip();
        apply(&pks, &timestamps)?;

        state.records = Vec::new();
        state.flushed = true;
        Ok(())
    }

    /// Whether a flush has succeeded.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.state.lock().flushed
    }

    /// Records waiting for the flush.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(values: &[i64]) -> Vec<PrimaryKey> {
        values.iter().copied().map(PrimaryKey::Int64).collect()
    }

    #[test]
    fn flush_sorts_by_timestamp() {
        let buffer = DeleteBuffer::new();
        assert!(buffer.try_append(&keys(&[1, 2]), &[30, 10]).unwrap());
        assert!(buffer.try_append(&keys(&[3]), &[20]).unwrap());
        assert_eq!(buffer.len(), 3);

        let mut seen = None;
        buffer
            .flush(|pks, ts| {
                seen = Some((pks.to_vec(), ts.to_vec()));
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, Some((keys(&[2, 3, 1]), vec![10, 20, 30])));
        assert!(buffer.is_flushed());
        assert!(buffer.is_empty());
    }

    #[test]
    fn append_after_flush_is_refused() {
        let buffer = DeleteBuffer::new();
        buffer.flush(|_, _| Ok(())).unwrap();
        for _ in 0..3 {
            assert!(!buffer.try_append(&keys(&[1]), &[1]).unwrap());
        }
        assert!(!buffer.try_append(&[], &[]).unwrap());
        assert!(buffer.is_empty());
    }

    #[test]
    fn mismatched_lengths_are_refused() {
        let buffer = DeleteBuffer::new();
        let err = buffer.try_append(&keys(&[1, 2, 3]), &[5]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert!(buffer.is_empty());

        buffer.flush(|_, _| Ok(())).unwrap();
        assert!(!buffer.try_append(&keys(&[1]), &[1, 2]).unwrap());
    }

    #[test]
    fn discard_drops_records_and_stops_buffering() {
        let buffer = DeleteBuffer::new();
        buffer.try_append(&keys(&[1, 2]), &[1, 2]).unwrap();
        buffer.discard();
        assert!(buffer.is_empty());
        assert!(!buffer.try_append(&keys(&[3]), &[3]).unwrap());
    }

    #[test]
    fn failed_flush_can_be_retried() {
        let buffer = DeleteBuffer::new();
        buffer.try_append(&keys(&[9]), &[5]).unwrap();

        let err = buffer
            .flush(|_, _| Err(CoreError::engine("Delete", 1, "busy")))
            .unwrap_err();
        assert!(matches!(err, CoreError::Engine { .. }));
        assert!(!buffer.is_flushed());
        assert_eq!(buffer.len(), 1);
        assert!(buffer.try_append(&keys(&[10]), &[6]).unwrap());

        let mut applied = 0;
        buffer
            .flush(|pks, _| {
                applied = pks.len();
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, 2);
    }

    proptest! {
        #[test]
        fn equal_timestamps_keep_arrival_order(ts in prop::collection::vec(0u64..5, 1..60)) {
            let buffer = DeleteBuffer::new();
            let pks: Vec<PrimaryKey> = (0..ts.len() as i64).map(PrimaryKey::Int64).collect();
            buffer.try_append(&pks, &ts).unwrap();

            let mut out = Vec::new();
            buffer.flush(|pks, ts| {
                out = pks.iter().cloned().zip(ts.iter().copied()).collect();
                Ok(())
            }).unwrap();

            for pair in out.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].1);
                if pair[0].1 == pair[1].1 {
                    prop_assert!(pair[0].0 < pair[1].0);
                }
            }
        }
    }
}
