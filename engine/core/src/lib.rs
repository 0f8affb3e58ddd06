pub mod api;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod meta;
pub mod ops;
pub mod program;
pub mod status;
pub mod value;

/// Stable identifier of a dataset within the configured keyspace
pub type Didentifier = u64;

/// Fingerprint identifying a submitted job (function + query over a dataset)
pub type Fidentifier = u64;

/// Index of a storage node within the cluster (0-based, stable across the deployment)
pub type NodeId = usize;
