//! Configuration types for shards and their sub-stores.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-shard configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardOptions {
    /// Root directory of the shard (`blob/`, `meta/`, `cache/`, `metadata.json`).
    pub path: PathBuf,
    /// Payloads up to this size go to the small-blob pool; larger ones to the
    /// file tree.
    pub small_size_limit: u64,
    /// Directory depth of the large-blob file tree.
    pub blob_depth: usize,
    /// Directory fan-out width of the large-blob file tree.
    pub blob_width: usize,
    /// Number of small-blob pool sub-stores.
    pub pool_width: u16,
    /// Optional write-cache staging tier.
    pub write_cache: Option<WriteCacheOptions>,
    /// Interval between garbage-removal sweeps.
    pub gc_remove_interval: Duration,
    /// Interval between expiration checks when no epoch event arrives.
    pub gc_expired_interval: Duration,
    /// Addresses removed per garbage batch.
    pub gc_batch_size: usize,
    /// Rebuild the metabase from the blob store on the next init.
    pub refill_metabase: bool,
    /// Open the shard read-only.
    pub read_only: bool,
    /// Engine demotes the shard to degraded mode after this many store errors.
    pub error_threshold: u32,
}

impl ShardOptions {
    /// Options rooted at `path` with defaults for everything else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shard"),
            small_size_limit: 128 * 1024,
            blob_depth: 2,
            blob_width: 2,
            pool_width: 4,
            write_cache: None,
            gc_remove_interval: Duration::from_secs(60),
            gc_expired_interval: Duration::from_secs(60),
            gc_batch_size: 100,
            refill_metabase: false,
            read_only: false,
            error_threshold: 32,
        }
    }
}

/// Write-cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteCacheOptions {
    /// Total payload bytes the cache may stage.
    pub capacity: u64,
    /// Largest single object admitted to the cache.
    pub max_object_size: u64,
    /// Interval between flush passes.
    pub flush_interval: Duration,
}

impl Default for WriteCacheOptions {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            max_object_size: 128 * 1024,
            flush_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ShardOptions::new("/tmp/shard-0");
        assert_eq!(opts.path, PathBuf::from("/tmp/shard-0"));
        assert_eq!(opts.small_size_limit, 128 * 1024);
        assert!(opts.write_cache.is_none());
        assert!(!opts.read_only);
    }
}
