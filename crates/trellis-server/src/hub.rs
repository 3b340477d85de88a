use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use trellis_protocol::{Notification, Operation, StoreRequest, StoreResponse};
use trellis_types::{dataset_key, generate_key, integrate, Dataset, DatasetKey, Query};

use crate::auth::{Action, AuthProvider, Credentials};

/// Which store a request addresses: `(dbName, storeName)`.
pub type StoreId = (Option<String>, String);

/// A change applied by the hub, announced to realtime connections.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub store: StoreId,
    pub notification: Notification,
}

/// In-memory datasets of every store the server hosts.
///
/// Both the HTTP endpoint and realtime connections go through
/// [`StoreHub::handle`]; every successful write or delete is broadcast.
pub struct StoreHub {
    stores: RwLock<HashMap<StoreId, IndexMap<String, Dataset>>>,
    auth: Arc<dyn AuthProvider>,
    changes: broadcast::Sender<Change>,
}

impl StoreHub {
    /// Create an empty hub. `push_buffer` bounds how far a realtime subscriber may lag.
    pub fn new(auth: Arc<dyn AuthProvider>, push_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(push_buffer.max(1));
        Self {
            stores: RwLock::new(HashMap::new()),
            auth,
            changes,
        }
    }

    /// Receive every change applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    /// Number of datasets in one store.
    pub fn count(&self, store: &StoreId) -> usize {
        self.stores
            .read()
            .expect("lock poisoned")
            .get(store)
            .map_or(0, IndexMap::len)
    }

    /// Apply a request. Refusals come back as the error sentinel.
    pub async fn handle(&self, request: StoreRequest) -> StoreResponse {
        let action = Action::of(&request);
        let identity = match self.auth.authenticate(&Credentials::of(&request)).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "request rejected");
                return StoreResponse::Error("unauthorized".into());
            }
        };
        match self.auth.authorize(&identity, &action).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!(user = %identity.name, action = %action, "request denied");
                return StoreResponse::Error(format!("{action} denied"));
            }
        }

        let Some(store_name) = request.store_name.clone() else {
            return StoreResponse::Error("storeName is required".into());
        };
        let store = (request.db_name.clone(), store_name);
        debug!(store = %store.1, kind = request.kind(), user = %identity.name, "store request");

        match request.operation {
            Operation::Read { key } => match Query::from_json(key.as_ref()) {
                Ok(query) => self.read(&store, &query),
                Err(e) => StoreResponse::Error(e.to_string()),
            },
            Operation::Write { dataset } => self.write(store, dataset),
            Operation::Delete { del } => self.delete(store, &del),
        }
    }

    fn read(&self, store: &StoreId, query: &Query) -> StoreResponse {
        let stores = self.stores.read().expect("lock poisoned");
        let Some(datasets) = stores.get(store) else {
            return match query {
                Query::Key(_) => StoreResponse::Empty,
                _ => StoreResponse::Records(Vec::new()),
            };
        };
        match query {
            Query::Key(key) => datasets
                .get(&key.cache_key())
                .cloned()
                .map_or(StoreResponse::Empty, StoreResponse::Record),
            _ => StoreResponse::Records(datasets.values().filter(|d| query.matches(d)).cloned().collect()),
        }
    }

    fn write(&self, store: StoreId, mut dataset: Dataset) -> StoreResponse {
        let key = match dataset.get("key") {
            None | Some(Value::Null) => {
                let key = DatasetKey::from(generate_key());
                dataset.insert("key".into(), key.to_json());
                key
            }
            Some(_) => match dataset_key(&dataset) {
                Some(key) if key.is_valid() => key,
                _ => return StoreResponse::Error("invalid dataset key".into()),
            },
        };

        let stored = {
            let mut stores = self.stores.write().expect("lock poisoned");
            let datasets = stores.entry(store.clone()).or_default();
            let entry = datasets.entry(key.cache_key()).or_default();
            integrate(&dataset, entry);
            entry.clone()
        };
        let _ = self.changes.send(Change {
            store,
            notification: Notification::Changed(stored.clone()),
        });
        StoreResponse::Record(stored)
    }

    fn delete(&self, store: StoreId, key: &DatasetKey) -> StoreResponse {
        if !key.is_valid() {
            return StoreResponse::Error("invalid dataset key".into());
        }
        let removed = self
            .stores
            .write()
            .expect("lock poisoned")
            .get_mut(&store)
            .and_then(|datasets| datasets.shift_remove(&key.cache_key()));
        match removed {
            Some(dataset) => {
                let _ = self.changes.send(Change {
                    store,
                    notification: Notification::Deleted(key.clone()),
                });
                StoreResponse::Record(dataset)
            }
            None => StoreResponse::Empty,
        }
    }
}

impl std::fmt::Debug for StoreHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHub")
            .field("stores", &self.stores.read().expect("lock poisoned").len())
            .field("subscribers", &self.changes.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAllAuth, TokenAuth};
    use serde_json::json;

    fn obj(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn hub() -> StoreHub {
        StoreHub::new(Arc::new(AllowAllAuth), 16)
    }

    fn users(request: StoreRequest) -> StoreRequest {
        request.in_store(Some("users".into()), None)
    }

    #[tokio::test]
    async fn write_read_delete() {
        let hub = hub();
        let written = hub.handle(users(StoreRequest::write(obj(json!({"key": "ada", "age": 36}))))).await;
        assert_eq!(written, StoreResponse::Record(obj(json!({"key": "ada", "age": 36}))));

        let merged = hub.handle(users(StoreRequest::write(obj(json!({"key": "ada", "city": "London"}))))).await;
        assert_eq!(merged.to_json(), json!({"key": "ada", "age": 36, "city": "London"}));

        let read = hub.handle(users(StoreRequest::read(&Query::from("ada")))).await;
        assert_eq!(read.to_json()["city"], json!("London"));

        let gone = hub.handle(users(StoreRequest::delete("ada".into()))).await;
        assert!(matches!(gone, StoreResponse::Record(_)));
        assert_eq!(hub.handle(users(StoreRequest::read(&Query::from("ada")))).await, StoreResponse::Empty);
        assert_eq!(hub.handle(users(StoreRequest::delete("ada".into()))).await, StoreResponse::Empty);
    }

    #[tokio::test]
    async fn queries_filter_by_subset() {
        let hub = hub();
        for ds in [
            json!({"key": "a", "team": "red"}),
            json!({"key": "b", "team": "blue"}),
            json!({"key": "c", "team": "red"}),
        ] {
            hub.handle(users(StoreRequest::write(obj(ds)))).await;
        }
        let red = hub
            .handle(users(StoreRequest::read(&Query::Match(obj(json!({"team": "red"}))))))
            .await;
        assert_eq!(red.into_records().unwrap().len(), 2);
        let all = hub.handle(users(StoreRequest::read(&Query::All))).await;
        assert_eq!(all.into_records().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stores_are_separate_per_db() {
        let hub = hub();
        hub.handle(StoreRequest::write(obj(json!({"key": "x"}))).in_store(Some("s".into()), Some("one".into())))
            .await;
        assert_eq!(hub.count(&(Some("one".into()), "s".into())), 1);
        assert_eq!(hub.count(&(None, "s".into())), 0);
    }

    #[tokio::test]
    async fn refusals_use_the_sentinel() {
        let hub = hub();
        let missing_store = hub.handle(StoreRequest::read(&Query::All)).await;
        assert!(missing_store.is_error());
        let bad_key = hub.handle(users(StoreRequest::write(obj(json!({"key": "no spaces"}))))).await;
        assert_eq!(bad_key, StoreResponse::Error("invalid dataset key".into()));

        let locked = StoreHub::new(Arc::new(TokenAuth::new(HashMap::new(), true)), 4);
        let write = locked.handle(users(StoreRequest::write(obj(json!({"key": "a"}))))).await;
        assert!(write.is_error());
        assert_eq!(locked.count(&(None, "users".into())), 0);
    }

    #[tokio::test]
    async fn generated_keys_and_broadcasts() {
        let hub = hub();
        let mut changes = hub.subscribe();
        let written = hub.handle(users(StoreRequest::write(obj(json!({"v": 1}))))).await;
        let key = written.to_json()["key"].clone();
        assert!(key.is_string());

        let change = changes.recv().await.unwrap();
        assert_eq!(change.store, (None, "users".to_string()));
        assert!(matches!(change.notification, Notification::Changed(ref d) if d["v"] == json!(1)));

        hub.handle(users(StoreRequest::delete(DatasetKey::from_json(&key).unwrap()))).await;
        let change = changes.recv().await.unwrap();
        assert!(matches!(change.notification, Notification::Deleted(_)));
    }
}
