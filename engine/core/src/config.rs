use crate::NodeId;
use std::time::Duration;

/// Per-node engine configuration.
///
/// Loading this from a deployment config file is the daemon tier's concern;
/// the engine only consumes the resolved values.
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of the dataset-identifier keyspace shared by the cluster
    pub keyspace_size: u64,

    /// Index of this node within the cluster
    pub node_idx: NodeId,

    /// Bound on waiting for a reduction round (and for ghost-gated partials)
    pub round_timeout: Duration,

    /// Worker count for the pipeline interpreter's `Parallel` composites
    pub parallel_workers: usize,

    /// Entry bound for the persistent stores' read-through caches
    pub store_cache_size: u64,
}

impl Config {
    pub fn new(keyspace_size: u64, node_idx: NodeId) -> Self {
        Self { keyspace_size, node_idx, round_timeout: Duration::from_secs(30), parallel_workers: 4, store_cache_size: 1024 }
    }

    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }

    pub fn with_parallel_workers(mut self, parallel_workers: usize) -> Self {
        self.parallel_workers = parallel_workers;
        self
    }

    pub fn with_store_cache_size(mut self, store_cache_size: u64) -> Self {
        self.store_cache_size = store_cache_size;
        self
    }
}
