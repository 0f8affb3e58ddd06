use rocksdb::{DBWithThreadMode, MultiThreaded};

pub use conn_builder::ConnBuilder;

mod conn_builder;

/// The rocksdb handle shared by a storage node's dataset and existence-flag
/// stores. Multi-threaded mode: every peer-RPC handler reads concurrently,
/// while the stores' own write locks serialize mutation. Datasets are never
/// deleted within the engine, so the layer carries no destroy helper beyond
/// the test-lifetime teardown in [`crate::utils`].
pub type DB = DBWithThreadMode<MultiThreaded>;
