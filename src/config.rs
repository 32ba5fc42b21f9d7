//! Configuration for opening a request log.

use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Default capacity of the id to head-offset cache when none is configured.
pub const DEFAULT_HEAD_CACHE_CAPACITY: usize = 4096;

/// Configuration for a [`ReqLogMgr`](crate::manager::ReqLogMgr) instance.
///
/// The base directory holds `head.req.log` and the numbered data segments;
/// it is created if missing. The head-offset cache is bounded -- lookups
/// falling out of it are answered by binary search over the head index.
#[derive(Debug, Clone)]
pub struct ReqLogConfig {
    /// Directory the log files live under.
    pub base_dir: PathBuf,
    /// Capacity of the id to head-offset cache.
    pub head_cache_capacity: NonZeroUsize,
}

impl ReqLogConfig {
    /// Configuration with defaults for the given base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> ReqLogConfig {
        ReqLogConfig {
            base_dir: base_dir.into(),
            head_cache_capacity: NonZeroUsize::new(DEFAULT_HEAD_CACHE_CAPACITY)
                .expect("default cache capacity is nonzero"),
        }
    }

    /// Override the head-offset cache capacity.
    pub fn with_head_cache_capacity(mut self, capacity: NonZeroUsize) -> ReqLogConfig {
        self.head_cache_capacity = capacity;
        self
    }
}
