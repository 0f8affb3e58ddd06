use super::DatasetKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trellis_database::prelude::{CachedDbAccess, DbKey, DirectDbWriter, StoreError, StoreResult, DB};
use trellis_database::registry::DatabaseStorePrefixes;
use trellis_engine_core::value::Block;
use trellis_engine_core::Didentifier;

/// The durable per-dataset record: the owner's metadata slot plus the local
/// append-ordered shard of blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Encoded metadata object; present only on the responsibility owner
    pub meta: Option<Vec<u8>>,
    /// Local blocks in append order; never mutated or reordered once written
    pub blocks: Vec<Block>,
}

impl DatasetEntry {
    pub fn with_meta(meta: Vec<u8>) -> Self {
        Self { meta: Some(meta), blocks: Vec::new() }
    }

    /// A metadata-less shard entry as held by non-owner nodes
    pub fn shard() -> Self {
        Self { meta: None, blocks: Vec::new() }
    }
}

pub trait DatasetStoreReader {
    fn has(&self, didentifier: Didentifier) -> StoreResult<bool>;

    /// The owner's metadata slot, `None` on shard-only entries
    fn meta_bytes(&self, didentifier: Didentifier) -> StoreResult<Option<Vec<u8>>>;

    /// The local shard in append order; the metadata slot is never part of it
    fn blocks(&self, didentifier: Didentifier) -> StoreResult<Vec<Block>>;

    /// Every locally known entry
    fn entries(&self) -> StoreResult<Vec<(Didentifier, Arc<DatasetEntry>)>>;
}

pub trait DatasetStore: DatasetStoreReader {
    /// Writes the initial entry holding only the metadata slot
    fn create(&self, didentifier: Didentifier, meta: Vec<u8>) -> StoreResult<()>;

    /// Appends one block, creating the local shard entry if this node holds
    /// nothing for the dataset yet
    fn append_block(&self, didentifier: Didentifier, block: Block) -> StoreResult<()>;

    /// Replaces the metadata slot
    fn write_meta(&self, didentifier: Didentifier, meta: Vec<u8>) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct DbDatasetStore {
    db: Arc<DB>,
    access: CachedDbAccess<DatasetKey, Arc<DatasetEntry>>,
    // Serializes the store's read-modify-write cycles (append, meta rewrite)
    write_lock: Arc<Mutex<()>>,
}

impl DbDatasetStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            db: Arc::clone(&db),
            access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::Datasets.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn read_entry(&self, didentifier: Didentifier) -> StoreResult<Option<Arc<DatasetEntry>>> {
        match self.access.read(didentifier.into()) {
            Ok(entry) => Ok(Some(entry)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn missing(&self, didentifier: Didentifier) -> StoreError {
        StoreError::KeyNotFound(DbKey::new(self.access.prefix(), DatasetKey::from(didentifier)))
    }
}

impl DatasetStoreReader for DbDatasetStore {
    fn has(&self, didentifier: Didentifier) -> StoreResult<bool> {
        self.access.has(didentifier.into())
    }

    fn meta_bytes(&self, didentifier: Didentifier) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.read_entry(didentifier)?.ok_or_else(|| self.missing(didentifier))?.meta.clone())
    }

    fn blocks(&self, didentifier: Didentifier) -> StoreResult<Vec<Block>> {
        Ok(self.read_entry(didentifier)?.ok_or_else(|| self.missing(didentifier))?.blocks.clone())
    }

    fn entries(&self) -> StoreResult<Vec<(Didentifier, Arc<DatasetEntry>)>> {
        self.access.iterator().map(|pair| pair.map(|(key, entry)| (key.into(), entry))).collect()
    }
}

impl DatasetStore for DbDatasetStore {
    fn create(&self, didentifier: Didentifier, meta: Vec<u8>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        if self.access.has(didentifier.into())? {
            return Err(StoreError::KeyAlreadyExists(didentifier.to_string()));
        }
        self.access.write(DirectDbWriter::new(&self.db), didentifier.into(), Arc::new(DatasetEntry::with_meta(meta)))
    }

    fn append_block(&self, didentifier: Didentifier, block: Block) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut entry = match self.read_entry(didentifier)? {
            Some(entry) => DatasetEntry::clone(&entry),
            None => DatasetEntry::shard(),
        };
        entry.blocks.push(block);
        self.access.write(DirectDbWriter::new(&self.db), didentifier.into(), Arc::new(entry))
    }

    fn write_meta(&self, didentifier: Didentifier, meta: Vec<u8>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut entry = DatasetEntry::clone(&self.read_entry(didentifier)?.ok_or_else(|| self.missing(didentifier))?);
        entry.meta = Some(meta);
        self.access.write(DirectDbWriter::new(&self.db), didentifier.into(), Arc::new(entry))
    }
}
