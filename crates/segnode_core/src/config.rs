//! Query node configuration.

use crate::types::Endian;

/// Sizing for one dispatch pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Pool name, used for thread names and errors.
    pub name: &'static str,
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued tasks before submitters wait.
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Creates a pool config sized to the machine.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            name,
            workers,
            queue_capacity: workers * 4,
        }
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Configuration shared by every segment on a node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Node id, used as the metrics label.
    pub node_id: i64,

    /// Pool for mutation, loading and stat calls.
    pub dynamic_pool: PoolConfig,

    /// Pool for search and retrieve calls.
    pub query_pool: PoolConfig,

    /// Upper bound in bytes on a single retrieve result.
    pub max_output_size: i64,

    /// Byte order for bloom key encoding and binlog decoding.
    pub endian: Endian,

    /// Expected key count for a new bloom filter generation.
    pub bloom_filter_size: usize,

    /// Target false-positive rate for a new bloom filter generation.
    pub max_bloom_false_positive: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 0,
            dynamic_pool: PoolConfig::new("dynamic"),
            query_pool: PoolConfig::new("query"),
            max_output_size: 100 * 1024 * 1024, // 100 MiB
            endian: Endian::Little,
            bloom_filter_size: 100_000,
            max_bloom_false_positive: 0.005,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node id.
    #[must_use]
    pub const fn node_id(mut self, node_id: i64) -> Self {
        self.node_id = node_id;
        self
    }

    /// Sets the dynamic pool sizing.
    #[must_use]
    pub const fn dynamic_pool(mut self, pool: PoolConfig) -> Self {
        self.dynamic_pool = pool;
        self
    }

    /// Sets the query pool sizing.
    #[must_use]
    pub const fn query_pool(mut self, pool: PoolConfig) -> Self {
        self.query_pool = pool;
        self
    }

    /// Sets the retrieve output bound.
    #[must_use]
    pub const fn max_output_size(mut self, bytes: i64) -> Self {
        self.max_output_size = bytes;
        self
    }

    /// Sets the byte order.
    #[must_use]
    pub const fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Sets the bloom filter sizing.
    #[must_use]
    pub const fn bloom_filter(mut self, expected_keys: usize, false_positive: f64) -> Self {
        self.bloom_filter_size = expected_keys;
        self.max_bloom_false_positive = false_positive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_output_size, 100 * 1024 * 1024);
        assert_eq!(config.endian, Endian::Little);
        assert_eq!(config.bloom_filter_size, 100_000);
        assert!(config.dynamic_pool.workers >= 1);
        assert_eq!(
            config.query_pool.queue_capacity,
            config.query_pool.workers * 4
        );
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .node_id(9)
            .endian(Endian::Big)
            .query_pool(PoolConfig::new("q").workers(2).queue_capacity(3))
            .bloom_filter(10, 0.1);

        assert_eq!(config.node_id, 9);
        assert_eq!(config.endian, Endian::Big);
        assert_eq!(config.query_pool.workers, 2);
        assert_eq!(config.query_pool.queue_capacity, 3);
        assert_eq!(config.bloom_filter_size, 10);
    }
}
