//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for planning and executing job stages.
///
/// All fields have defaults; override them with the `with_*` builders.
///
/// # Examples
///
/// ```
/// use tcapflow_engine::Config;
///
/// let config = Config::default()
///     .with_num_threads(4)
///     .with_memory_limit(256 * 1024 * 1024);
/// assert_eq!(config.num_partitions, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of one output page, in bytes.
    pub page_size: usize,

    /// Maximum rows per tuple-set batch pulled from a source.
    pub batch_size: usize,

    /// Worker-pool size and scan parallelism.
    pub num_threads: usize,

    /// Partitions of hash-partitioned joins and aggregations.
    pub num_partitions: usize,

    /// Memory budget of the runtime context, in bytes.
    pub memory_limit: usize,

    /// Capacity, in pages, of each page buffer between the dispatcher and a
    /// worker.
    pub buffer_depth: usize,

    /// A join input whose source costs at most this many bytes is built by
    /// broadcast; larger inputs are hash-partitioned.
    pub broadcast_join_threshold: usize,

    /// Safety ratio when sizing a broadcast hash table.
    pub hash_table_ratio: f64,

    /// Reduced ratio used for the single broadcast retry.
    pub hash_table_retry_ratio: f64,

    /// Sizing ratio for each partition of a hash-partitioned build.
    pub shuffle_overlap_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);
        Self {
            page_size: 1024 * 1024,
            batch_size: 1024,
            num_threads,
            num_partitions: num_threads,
            memory_limit: 1024 * 1024 * 1024,
            buffer_depth: 2,
            broadcast_join_threshold: 64 * 1024 * 1024,
            hash_table_ratio: 1.5,
            hash_table_retry_ratio: 1.0,
            shuffle_overlap_ratio: 1.5,
        }
    }
}

impl Config {
    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes.max(1);
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    /// Sets the worker count. The partition count follows it.
    #[must_use]
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads.max(1);
        self.num_partitions = self.num_threads;
        self
    }

    /// Sets the partition count.
    #[must_use]
    pub fn with_num_partitions(mut self, partitions: usize) -> Self {
        self.num_partitions = partitions.max(1);
        self
    }

    /// Sets the memory budget.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the page buffer depth.
    #[must_use]
    pub fn with_buffer_depth(mut self, pages: usize) -> Self {
        self.buffer_depth = pages.max(1);
        self
    }

    /// Sets the broadcast join threshold.
    #[must_use]
    pub fn with_broadcast_join_threshold(mut self, bytes: usize) -> Self {
        self.broadcast_join_threshold = bytes;
        self
    }

    /// Sets the broadcast sizing ratio and its retry ratio.
    #[must_use]
    pub fn with_hash_table_ratios(mut self, ratio: f64, retry_ratio: f64) -> Self {
        self.hash_table_ratio = ratio;
        self.hash_table_retry_ratio = retry_ratio;
        self
    }

    /// Sets the partitioned-build sizing ratio.
    #[must_use]
    pub fn with_shuffle_overlap_ratio(mut self, ratio: f64) -> Self {
        self.shuffle_overlap_ratio = ratio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.page_size, 1024 * 1024);
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.buffer_depth, 2);
        assert_eq!(config.num_partitions, config.num_threads);
        assert!(config.num_threads >= 1);
        assert!((config.hash_table_ratio - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builders_clamp_to_one() {
        let config = Config::default()
            .with_num_threads(0)
            .with_batch_size(0)
            .with_buffer_depth(0);
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.num_partitions, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.buffer_depth, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "num_threads": 3, "batch_size": 8 }"#).unwrap();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.page_size, Config::default().page_size);
    }
}
