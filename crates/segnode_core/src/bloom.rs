//! Bloom filter over primary-key bytes.
//!
//! Bit positions use double hashing: one 128-bit xxh3 digest split into two
//! 64-bit halves `h1`, `h2`, probe `i` at `h1 + i * h2`.

use xxhash_rust::xxh3::xxh3_128;

/// A fixed-size bloom filter.
///
/// No false negatives; the false-positive rate approaches the configured
/// target once the expected number of keys has been added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_keys` at false-positive rate `fp_rate`.
    ///
    /// Out-of-range rates are clamped into `(0, 1)`; at least 64 bits and
    /// one hash function are always used.
    #[must_use]
    pub fn with_estimates(expected_keys: usize, fp_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let bits = (-n * p.ln() / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hashes = ((bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;
        let words = bits.div_ceil(64) as usize;

        Self {
            words: vec![0; words],
            num_bits: words as u64 * 64,
            num_hashes: hashes,
        }
    }

    /// Rebuilds a filter from persisted words.
    ///
    /// Returns `None` if `words` is empty or `num_hashes` is zero.
    #[must_use]
    pub fn from_words(words: Vec<u64>, num_hashes: u32) -> Option<Self> {
        if words.is_empty() || num_hashes == 0 {
            return None;
        }
        let num_bits = words.len() as u64 * 64;
        Some(Self {
            words,
            num_bits,
            num_hashes,
        })
    }

    /// Adds a key.
    pub fn add(&mut self, key: &[u8]) {
        for bit in self.probes(key) {
            self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// Returns false only if `key` was never added.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.probes(key)
            .all(|bit| self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    /// Filter size in bits.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Probes per key.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// The backing words, for persistence.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    fn probes(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let digest = xxh3_128(key);
        let h1 = digest as u64;
        let h2 = (digest >> 64) as u64 | 1;
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sizing_follows_estimates() {
        let filter = BloomFilter::with_estimates(100_000, 0.005);
        // ~11 bits and ~8 hashes per key at 0.5%.
        assert!(filter.num_bits() > 1_000_000);
        assert!(filter.num_bits() < 1_200_000);
        assert_eq!(filter.num_hashes(), 8);
    }

    #[test]
    fn tiny_filter_still_works() {
        let mut filter = BloomFilter::with_estimates(0, 2.0);
        assert_eq!(filter.num_bits(), 64);
        filter.add(b"k");
        assert!(filter.contains(b"k"));
    }

    #[test]
    fn false_positive_rate_near_target() {
        let mut filter = BloomFilter::with_estimates(10_000, 0.01);
        for i in 0..10_000u64 {
            filter.add(&i.to_le_bytes());
        }
        let false_positives = (10_000..110_000u64)
            .filter(|i| filter.contains(&i.to_le_bytes()))
            .count();
        assert!(false_positives < 2_000, "{false_positives} false positives");
    }

    #[test]
    fn restored_filter_answers_the_same() {
        let mut filter = BloomFilter::with_estimates(100, 0.01);
        filter.add(b"alpha");
        let restored = BloomFilter::from_words(filter.words().to_vec(), filter.num_hashes())
            .unwrap();
        assert_eq!(restored, filter);
        assert!(restored.contains(b"alpha"));
        assert!(BloomFilter::from_words(Vec::new(), 3).is_none());
    }

    proptest! {
        #[test]
        fn no_false_negatives(keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 1..200)) {
            let mut filter = BloomFilter::with_estimates(keys.len(), 0.01);
            for key in &keys {
                filter.add(key);
            }
            for key in &keys {
                prop_assert!(filter.contains(key));
            }
        }
    }
}
