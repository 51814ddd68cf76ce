//! Property-based test generators using proptest.
//!
//! Strategies produce keys and timestamps shaped like real delete and
//! insert traffic: distinct keys, positive timestamps, batches that may
//! arrive out of order or be re-delivered.

use proptest::prelude::*;
use segnode_core::{PrimaryKey, Timestamp};

/// Test runner config with `cases` cases, for tests that start threads.
pub fn segment_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// Strategy for int64 primary keys.
pub fn int_key_strategy() -> impl Strategy<Value = PrimaryKey> {
    any::<i64>().prop_map(PrimaryKey::Int64)
}

/// Strategy for varchar primary keys.
pub fn varchar_key_strategy() -> impl Strategy<Value = PrimaryKey> {
    prop::string::string_regex("[a-z0-9]{1,16}")
        .expect("Invalid regex")
        .prop_map(PrimaryKey::VarChar)
}

/// Strategy for `1..=max_len` distinct int64 keys drawn from `0..key_space`.
pub fn distinct_keys_strategy(key_space: i64, max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(0..key_space, 1..=max_len)
        .prop_map(|keys| keys.into_iter().collect())
}

/// One delete batch: keys with one timestamp each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBatch {
    /// Keys deleted.
    pub pks: Vec<PrimaryKey>,
    /// Delete timestamps, parallel to `pks`.
    pub timestamps: Vec<Timestamp>,
}

impl DeleteBatch {
    /// Number of deletes in the batch.
    pub fn len(&self) -> usize {
        self.pks.len()
    }

    /// Returns true if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.pks.is_empty()
    }
}

/// Strategy for a non-empty delete batch over keys `0..key_space` with
/// timestamps in `1..=max_ts`, in arbitrary order.
pub fn delete_batch_strategy(
    key_space: i64,
    max_ts: Timestamp,
    max_len: usize,
) -> impl Strategy<Value = DeleteBatch> {
    prop::collection::vec((0..key_space, 1..=max_ts), 1..=max_len).prop_map(|pairs| {
        let (pks, timestamps) = pairs
            .into_iter()
            .map(|(pk, ts)| (PrimaryKey::Int64(pk), ts))
            .unzip();
        DeleteBatch { pks, timestamps }
    })
}

/// Strategy for a sequence of delete batches.
pub fn delete_batches_strategy(
    key_space: i64,
    max_ts: Timestamp,
    batches: usize,
) -> impl Strategy<Value = Vec<DeleteBatch>> {
    prop::collection::vec(delete_batch_strategy(key_space, max_ts, 16), 1..=batches)
}

/// Strategy for a float vector of `dim` finite components.
pub fn float_vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1000.0f32..1000.0, dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn distinct_keys_are_sorted_and_unique(keys in distinct_keys_strategy(100, 20)) {
            prop_assert!(!keys.is_empty());
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn delete_batches_are_parallel(batch in delete_batch_strategy(50, 10, 8)) {
            prop_assert_eq!(batch.pks.len(), batch.timestamps.len());
            prop_assert!(batch.timestamps.iter().all(|&ts| (1..=10).contains(&ts)));
        }

        #[test]
        fn varchar_keys_are_nonempty(key in varchar_key_strategy()) {
            let PrimaryKey::VarChar(s) = key else {
                panic!("expected a varchar key");
            };
            prop_assert!(!s.is_empty());
        }
    }
}
