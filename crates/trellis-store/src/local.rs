use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use indexmap::IndexMap;
use trellis_types::{dataset_key, Dataset, DatasetKey};

use crate::error::{StoreError, StoreResult};

/// Where a named store lives inside a local backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    pub db_name: Option<String>,
    pub store_name: String,
}

impl StoreLocation {
    pub fn new(db_name: Option<String>, store_name: impl Into<String>) -> Self {
        Self {
            db_name,
            store_name: store_name.into(),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.db_name {
            Some(db) => write!(f, "{db}/{}", self.store_name),
            None => f.write_str(&self.store_name),
        }
    }
}

/// Host-provided indexed store backing the local tier.
///
/// Every named store is keyed by each dataset's `key` field. Implementations
/// must satisfy:
/// - `put` replaces the whole dataset at its key; merging happens above.
/// - `delete` returns the removed dataset, or `None` if the key was absent.
/// - `all` yields datasets in insertion order.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>>;

    async fn put(&self, location: &StoreLocation, dataset: &Dataset) -> StoreResult<()>;

    async fn delete(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>>;

    async fn all(&self, location: &StoreLocation) -> StoreResult<Vec<Dataset>>;
}

/// Extract the cache key of a dataset headed for a local store.
pub(crate) fn stored_key(dataset: &Dataset) -> StoreResult<String> {
    dataset_key(dataset)
        .map(|key| key.cache_key())
        .ok_or_else(|| StoreError::InvalidKey("dataset has no key".into()))
}

/// In-memory [`LocalStore`]. Intended for tests and embedding.
#[derive(Default)]
pub struct MemoryLocalStore {
    stores: RwLock<HashMap<StoreLocation, IndexMap<String, Dataset>>>,
}

impl MemoryLocalStore {
    /// Create a new empty in-memory local store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of datasets held for `location`.
    pub fn count(&self, location: &StoreLocation) -> usize {
        self.stores
            .read()
            .expect("lock poisoned")
            .get(location)
            .map_or(0, IndexMap::len)
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>> {
        let stores = self.stores.read().expect("lock poisoned");
        Ok(stores
            .get(location)
            .and_then(|store| store.get(&key.cache_key()))
            .cloned())
    }

    async fn put(&self, location: &StoreLocation, dataset: &Dataset) -> StoreResult<()> {
        let key = stored_key(dataset)?;
        let mut stores = self.stores.write().expect("lock poisoned");
        stores
            .entry(location.clone())
            .or_default()
            .insert(key, dataset.clone());
        Ok(())
    }

    async fn delete(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>> {
        let mut stores = self.stores.write().expect("lock poisoned");
        Ok(stores
            .get_mut(location)
            .and_then(|store| store.shift_remove(&key.cache_key())))
    }

    async fn all(&self, location: &StoreLocation) -> StoreResult<Vec<Dataset>> {
        let stores = self.stores.read().expect("lock poisoned");
        Ok(stores
            .get(location)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl fmt::Debug for MemoryLocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stores = self.stores.read().expect("lock poisoned").len();
        f.debug_struct("MemoryLocalStore").field("stores", &stores).finish()
    }
}
