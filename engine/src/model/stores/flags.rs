use super::DatasetKey;
use std::sync::Arc;
use trellis_database::prelude::{CachedDbAccess, DirectDbWriter, StoreResult, DB};
use trellis_database::registry::DatabaseStorePrefixes;
use trellis_engine_core::Didentifier;

pub trait ExistenceFlagStoreReader {
    /// Whether the dataset was ever created on this node
    fn is_set(&self, didentifier: Didentifier) -> StoreResult<bool>;
}

pub trait ExistenceFlagStore: ExistenceFlagStoreReader {
    fn set(&self, didentifier: Didentifier) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct DbExistenceFlagStore {
    db: Arc<DB>,
    access: CachedDbAccess<DatasetKey, ()>,
}

impl DbExistenceFlagStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { db: Arc::clone(&db), access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::ExistenceFlags.into()) }
    }
}

impl ExistenceFlagStoreReader for DbExistenceFlagStore {
    fn is_set(&self, didentifier: Didentifier) -> StoreResult<bool> {
        self.access.has(didentifier.into())
    }
}

impl ExistenceFlagStore for DbExistenceFlagStore {
    fn set(&self, didentifier: Didentifier) -> StoreResult<()> {
        self.access.write(DirectDbWriter::new(&self.db), didentifier.into(), ())
    }
}
