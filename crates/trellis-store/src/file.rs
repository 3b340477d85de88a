use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::debug;
use trellis_types::{is_valid_key_text, Dataset, DatasetKey};

use crate::error::{StoreError, StoreResult};
use crate::local::{stored_key, LocalStore, StoreLocation};

const DEFAULT_DB: &str = "default";

/// File-backed [`LocalStore`].
///
/// Each named store is one JSON file holding an array of datasets, at
/// `<root>/<dbName or "default">/<storeName>.json`. Writes rewrite the whole
/// file through a temporary file and a rename. A single mutex serializes
/// every read-modify-write cycle.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store keeping its files under `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the store files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, location: &StoreLocation) -> StoreResult<PathBuf> {
        let db = location.db_name.as_deref().unwrap_or(DEFAULT_DB);
        for name in [db, location.store_name.as_str()] {
            if !is_valid_key_text(name) {
                return Err(StoreError::InvalidSettings(format!("invalid store name: {name:?}")));
            }
        }
        Ok(self.root.join(db).join(format!("{}.json", location.store_name)))
    }

    async fn read_store(&self, location: &StoreLocation) -> StoreResult<IndexMap<String, Dataset>> {
        let path = self.path_of(location)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexMap::new()),
            Err(e) => return Err(e.into()),
        };
        let datasets: Vec<Dataset> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Local(format!("{}: {e}", path.display())))?;
        datasets
            .into_iter()
            .map(|dataset| Ok((stored_key(&dataset)?, dataset)))
            .collect()
    }

    async fn write_store(
        &self,
        location: &StoreLocation,
        store: &IndexMap<String, Dataset>,
    ) -> StoreResult<()> {
        let path = self.path_of(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let datasets: Vec<&Dataset> = store.values().collect();
        let bytes = serde_json::to_vec_pretty(&datasets)
            .map_err(|e| StoreError::Local(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), datasets = store.len(), "wrote local store");
        Ok(())
    }
}

#[async_trait]
impl LocalStore for JsonFileStore {
    async fn get(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>> {
        let store = self.read_store(location).await?;
        Ok(store.get(&key.cache_key()).cloned())
    }

    async fn put(&self, location: &StoreLocation, dataset: &Dataset) -> StoreResult<()> {
        let key = stored_key(dataset)?;
        let _guard = self.write_lock.lock().await;
        let mut store = self.read_store(location).await?;
        store.insert(key, dataset.clone());
        self.write_store(location, &store).await
    }

    async fn delete(&self, location: &StoreLocation, key: &DatasetKey) -> StoreResult<Option<Dataset>> {
        let _guard = self.write_lock.lock().await;
        let mut store = self.read_store(location).await?;
        let removed = store.shift_remove(&key.cache_key());
        if removed.is_some() {
            self.write_store(location, &store).await?;
        }
        Ok(removed)
    }

    async fn all(&self, location: &StoreLocation) -> StoreResult<Vec<Dataset>> {
        Ok(self.read_store(location).await?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn ds(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let loc = StoreLocation::new(Some("main".into()), "users");
        {
            let store = JsonFileStore::new(dir.path());
            store.put(&loc, &ds(json!({"key": "ada", "age": 36}))).await.unwrap();
            store.put(&loc, &ds(json!({"key": "bob", "age": 41}))).await.unwrap();
        }
        assert!(dir.path().join("main").join("users.json").exists());

        let reopened = JsonFileStore::new(dir.path());
        let all = reopened.all(&loc).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["key"], json!("ada"));
        let bob = reopened.get(&loc, &DatasetKey::from("bob")).await.unwrap().unwrap();
        assert_eq!(bob["age"], json!(41));
    }

    #[tokio::test]
    async fn missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let loc = StoreLocation::new(None, "nothing");
        assert!(store.all(&loc).await.unwrap().is_empty());
        assert!(store.get(&loc, &DatasetKey::from("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_returns_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let loc = StoreLocation::new(None, "s");
        store.put(&loc, &ds(json!({"key": 7, "v": "x"}))).await.unwrap();
        let removed = store.delete(&loc, &DatasetKey::Number(7)).await.unwrap();
        assert_eq!(removed.unwrap()["v"], json!("x"));
        assert!(store.delete(&loc, &DatasetKey::Number(7)).await.unwrap().is_none());
        assert!(store.all(&loc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let loc = StoreLocation::new(None, "../escape");
        let err = store.put(&loc, &ds(json!({"key": "a"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSettings(_)));
    }
}
