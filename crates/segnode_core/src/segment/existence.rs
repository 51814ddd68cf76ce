//! Primary-key existence checks over bloom filter generations.

use super::Segment;
use crate::bloom::BloomFilter;
use crate::error::{CoreError, CoreResult};
use crate::pk_stats::PkStatistics;
use crate::types::PrimaryKey;
use std::sync::atomic::Ordering;
use tracing::{error, warn};

impl Segment {
    /// Records `keys` in the current statistics generation, creating it
    /// on first use.
    ///
    /// Deleted keys are never removed, so existence checks may report
    /// stale positives for them.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Fatal`] if the schema has no primary key or a key
    ///   does not match its type. Nothing is recorded in that case.
    /// - [`CoreError::Unhealthy`] after destruction
    pub fn update_bloom_filter(&self, keys: &[PrimaryKey]) -> CoreResult<()> {
        let pk_type = self
            .schema
            .primary_key()
            .map(|field| field.data_type)
            .ok_or_else(|| {
                CoreError::fatal(format!("segment {} has no primary key field", self.id()))
            })?;

        if let Some(key) = keys.iter().find(|key| key.data_type() != pk_type) {
            error!(
                segment_id = self.id(),
                expected = %pk_type,
                actual = %key.data_type(),
                "invalid data type of primary keys"
            );
            return Err(CoreError::fatal(format!(
                "invalid data type of primary keys: expected {pk_type}, got {}",
                key.data_type()
            )));
        }

        let config = &self.runtime.config;
        let mut stats = self.stats.lock();
        if stats.destroyed {
            return Err(CoreError::unhealthy(self.id()));
        }
        let current = stats.current.get_or_insert_with(|| {
            PkStatistics::new(
                BloomFilter::with_estimates(
                    config.bloom_filter_size,
                    config.max_bloom_false_positive,
                ),
                config.endian,
            )
        });
        for key in keys {
            current.add(key);
        }
        Ok(())
    }

    /// Whether `pk` may be present in this segment.
    ///
    /// Never false for a key recorded in the current or a historical
    /// generation. Always true while statistics are still being loaded,
    /// and always false once the segment is destroyed.
    #[must_use]
    pub fn is_pk_exist(&self, pk: &PrimaryKey) -> bool {
        let stats = self.stats.lock();
        if stats.destroyed {
            return false;
        }
        if self.is_lazy_loading() {
            warn!(
                segment_id = self.id(),
                "processing delete while bloom filter is lazy loading, may harm performance"
            );
            return true;
        }

        stats
            .current
            .iter()
            .chain(stats.history.iter())
            .any(|generation| generation.pk_exist(pk))
    }

    /// Marks statistics as still loading.
    pub fn set_lazy_loading(&self, loading: bool) {
        self.lazy_loading.store(loading, Ordering::Release);
    }

    /// True while statistics are still loading.
    #[must_use]
    pub fn is_lazy_loading(&self) -> bool {
        self.lazy_loading.load(Ordering::Acquire)
    }

    /// Appends a restored statistics generation.
    ///
    /// Ignored once the segment is destroyed.
    pub fn add_history_stats(&self, stats: PkStatistics) {
        let mut generations = self.stats.lock();
        if generations.destroyed {
            warn!(segment_id = self.id(), "dropping history stats of destroyed segment");
            return;
        }
        generations.history.push(stats);
    }

    /// Number of historical generations held.
    #[must_use]
    pub fn history_generations(&self) -> usize {
        self.stats.lock().history.len()
    }
}
