//! Primary-key statistics: one bloom filter plus the key range it covers.

use crate::bloom::BloomFilter;
use crate::types::{Endian, PrimaryKey};

/// Canonical filter bytes of a key.
///
/// Int64 keys are 8 bytes in `endian` order; VarChar keys are their UTF-8
/// bytes.
#[must_use]
pub fn encode_pk(pk: &PrimaryKey, endian: Endian) -> Vec<u8> {
    match pk {
        PrimaryKey::Int64(v) => endian.encode_i64(*v).to_vec(),
        PrimaryKey::VarChar(s) => s.as_bytes().to_vec(),
    }
}

/// Approximate membership for one generation of primary keys.
#[derive(Debug, Clone)]
pub struct PkStatistics {
    filter: BloomFilter,
    min_pk: Option<PrimaryKey>,
    max_pk: Option<PrimaryKey>,
    endian: Endian,
}

impl PkStatistics {
    /// Empty statistics backed by `filter`.
    #[must_use]
    pub fn new(filter: BloomFilter, endian: Endian) -> Self {
        Self {
            filter,
            min_pk: None,
            max_pk: None,
            endian,
        }
    }

    /// Statistics restored from a persisted filter and key range.
    #[must_use]
    pub fn restore(
        filter: BloomFilter,
        min_pk: PrimaryKey,
        max_pk: PrimaryKey,
        endian: Endian,
    ) -> Self {
        Self {
            filter,
            min_pk: Some(min_pk),
            max_pk: Some(max_pk),
            endian,
        }
    }

    /// Widens the key range to cover `pk`.
    pub fn update_min_max(&mut self, pk: &PrimaryKey) {
        if self.min_pk.as_ref().map_or(true, |min| pk < min) {
            self.min_pk = Some(pk.clone());
        }
        if self.max_pk.as_ref().map_or(true, |max| pk > max) {
            self.max_pk = Some(pk.clone());
        }
    }

    /// Records `pk`: widens the range and adds it to the filter.
    pub fn add(&mut self, pk: &PrimaryKey) {
        self.update_min_max(pk);
        self.filter.add(&encode_pk(pk, self.endian));
    }

    /// Returns false only if `pk` was never added.
    ///
    /// Keys outside `[min_pk, max_pk]` are rejected before the filter is
    /// consulted. Empty statistics hold nothing.
    #[must_use]
    pub fn pk_exist(&self, pk: &PrimaryKey) -> bool {
        let (Some(min), Some(max)) = (&self.min_pk, &self.max_pk) else {
            return false;
        };
        if pk < min || pk > max {
            return false;
        }
        self.filter.contains(&encode_pk(pk, self.endian))
    }

    /// Smallest key seen.
    #[must_use]
    pub fn min_pk(&self) -> Option<&PrimaryKey> {
        self.min_pk.as_ref()
    }

    /// Largest key seen.
    #[must_use]
    pub fn max_pk(&self) -> Option<&PrimaryKey> {
        self.max_pk.as_ref()
    }

    /// The backing filter.
    #[must_use]
    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> PkStatistics {
        PkStatistics::new(BloomFilter::with_estimates(1_000, 0.001), Endian::Little)
    }

    #[test]
    fn int_keys_encode_per_endian() {
        let pk = PrimaryKey::Int64(1);
        assert_eq!(encode_pk(&pk, Endian::Little), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_pk(&pk, Endian::Big), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(encode_pk(&"ab".into(), Endian::Big), b"ab".to_vec());
    }

    #[test]
    fn empty_stats_hold_nothing() {
        assert!(!stats().pk_exist(&PrimaryKey::Int64(0)));
    }

    #[test]
    fn range_tracks_added_keys() {
        let mut s = stats();
        for pk in [5, -3, 12] {
            s.add(&PrimaryKey::Int64(pk));
        }
        assert_eq!(s.min_pk(), Some(&PrimaryKey::Int64(-3)));
        assert_eq!(s.max_pk(), Some(&PrimaryKey::Int64(12)));
        assert!(s.pk_exist(&PrimaryKey::Int64(5)));
        assert!(!s.pk_exist(&PrimaryKey::Int64(13)));
        assert!(!s.pk_exist(&PrimaryKey::Int64(-4)));
    }

    #[test]
    fn range_check_short_circuits_filter() {
        // A filter that says yes to everything.
        let filter = BloomFilter::from_words(vec![u64::MAX], 2).unwrap();
        let s = PkStatistics::restore(filter, "b".into(), "d".into(), Endian::Little);
        assert!(s.pk_exist(&"c".into()));
        assert!(!s.pk_exist(&"a".into()));
        assert!(!s.pk_exist(&"e".into()));
    }

    #[test]
    fn byte_order_changes_membership_bytes() {
        let mut little = stats();
        little.add(&PrimaryKey::Int64(7));
        let big = encode_pk(&PrimaryKey::Int64(7), Endian::Big);
        assert!(little.filter().contains(&encode_pk(&PrimaryKey::Int64(7), Endian::Little)));
        assert_ne!(big, encode_pk(&PrimaryKey::Int64(7), Endian::Little));
    }
}
