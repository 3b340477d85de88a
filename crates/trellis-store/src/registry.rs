use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use trellis_loader::ResourceLoader;
use trellis_types::{Dataset, ReplayOrder, Waitlist};

use crate::config::StoreConfig;
use crate::datastore::{Backend, Datastore, RemoteLink};
use crate::error::{StoreError, StoreResult};
use crate::file::JsonFileStore;
use crate::local::{LocalStore, MemoryLocalStore};
use crate::realtime::{RealtimeClient, RealtimeConnector, TcpConnector};
use crate::remote::{HttpTransport, RemoteTransport};
use crate::settings::{LocalData, Signature, StoreSettings, Tier};

/// Backends the registry opens datastores on.
#[derive(Clone)]
pub struct StoreBackends {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteTransport>,
    /// `None` makes realtime settings fail to open.
    pub realtime: Option<Arc<dyn RealtimeConnector>>,
}

impl StoreBackends {
    /// Backends described by `config`: file-backed local stores when a data directory is set, in-memory otherwise.
    pub fn from_config(config: &StoreConfig) -> Self {
        let local: Arc<dyn LocalStore> = match &config.data_dir {
            Some(dir) => Arc::new(JsonFileStore::new(dir)),
            None => Arc::new(MemoryLocalStore::new()),
        };
        Self {
            local,
            remote: Arc::new(HttpTransport::new(config.request_timeout())),
            realtime: Some(Arc::new(TcpConnector)),
        }
    }
}

impl Default for StoreBackends {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// State of a signature in the registry.
#[derive(Clone, Debug)]
pub enum Lookup {
    Absent,
    /// Being opened; requests for it wait.
    Pending,
    Ready(Arc<Datastore>),
}

type Waiter = oneshot::Sender<StoreResult<Arc<Datastore>>>;

struct RegistryState {
    stores: HashMap<Signature, Arc<Datastore>>,
    pending: Waitlist<Signature, Waiter>,
    generation: u64,
}

/// Maps settings signatures to shared datastores.
///
/// Opening a store can take a while (seed data to load, a connection to
/// establish). While it does, the signature is pending and every other
/// request for it queues behind the first instead of opening a duplicate.
pub struct StoreRegistry {
    this: Weak<StoreRegistry>,
    loader: Arc<ResourceLoader>,
    backends: StoreBackends,
    state: Mutex<RegistryState>,
}

/// Fails the queued requests of a signature if the opening future is
/// dropped before it completes.
struct PendingGuard<'a> {
    registry: &'a StoreRegistry,
    signature: &'a Signature,
    generation: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.registry.state.lock().expect("lock poisoned");
            if state.generation != self.generation {
                return;
            }
            let abandoned = state.pending.finish(self.signature);
            warn!(store = %self.signature, waiters = abandoned.len(), "store opening dropped");
        }
    }
}

impl StoreRegistry {
    /// Create an empty registry opening stores on `backends`.
    pub fn new(loader: Arc<ResourceLoader>, backends: StoreBackends, replay_order: ReplayOrder) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            loader,
            backends,
            state: Mutex::new(RegistryState {
                stores: HashMap::new(),
                pending: Waitlist::new(replay_order),
                generation: 0,
            }),
        })
    }

    /// Loader used for `local` seed URLs and data dependencies.
    pub fn loader(&self) -> &Arc<ResourceLoader> {
        &self.loader
    }

    /// The datastore for `settings`, opening it if needed.
    ///
    /// Settings with equal signatures always yield the same datastore, so
    /// every tier-1 setting (no `url`, no `storeName`) shares one store.
    pub async fn store(&self, settings: &StoreSettings) -> StoreResult<Arc<Datastore>> {
        let signature = settings.signature();

        let (pending, generation) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(store) = state.stores.get(&signature) {
                return Ok(Arc::clone(store));
            }
            if state.pending.begin(signature.clone()) {
                (None, state.generation)
            } else {
                let (tx, rx) = oneshot::channel();
                let _ = state.pending.defer(&signature, tx);
                (Some(rx), state.generation)
            }
        };

        if let Some(rx) = pending {
            debug!(store = %signature, "waiting for store under construction");
            return rx
                .await
                .unwrap_or_else(|_| Err(StoreError::Unavailable(signature.to_string())));
        }

        let mut guard = PendingGuard {
            registry: self,
            signature: &signature,
            generation,
            armed: true,
        };
        let result = self.open(settings).await;
        guard.armed = false;

        // After a reset the pending entry (if any) belongs to a newer opener.
        let waiters = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.generation != generation {
                Vec::new()
            } else {
                if let Ok(store) = &result {
                    state.stores.insert(signature.clone(), Arc::clone(store));
                }
                state.pending.finish(&signature)
            }
        };
        drop(guard);

        match &result {
            Ok(store) => info!(store = %signature, tier = %store.tier(), waiters = waiters.len(), "datastore opened"),
            Err(e) => warn!(store = %signature, error = %e, "datastore failed to open"),
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Whether `signature` is registered, being opened, or unknown.
    pub fn lookup(&self, signature: &Signature) -> Lookup {
        let state = self.state.lock().expect("lock poisoned");
        if let Some(store) = state.stores.get(signature) {
            Lookup::Ready(Arc::clone(store))
        } else if state.pending.is_pending(signature) {
            Lookup::Pending
        } else {
            Lookup::Absent
        }
    }

    /// Number of registered datastores.
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every registered datastore. Requests queued behind a store
    /// being opened fail with [`StoreError::Unavailable`]; the store itself
    /// still opens for its first caller but is not registered.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stores.clear();
        state.pending.clear();
        state.generation += 1;
        info!(generation = state.generation, "store registry reset");
    }

    async fn open(&self, settings: &StoreSettings) -> StoreResult<Arc<Datastore>> {
        let tier = settings.tier();
        let store = match tier {
            Tier::Memory => Arc::new(Datastore::new(settings.clone(), Backend::Memory, self.this.clone())),
            Tier::Local => {
                let location = settings
                    .location()
                    .ok_or_else(|| StoreError::InvalidSettings("local tier without storeName".into()))?;
                let preload = self.backends.local.all(&location).await?;
                let backend = Backend::Local {
                    store: Arc::clone(&self.backends.local),
                    location,
                };
                let store = Arc::new(Datastore::new(settings.clone(), backend, self.this.clone()));
                store.seed(preload);
                store
            }
            Tier::Remote => {
                let url = settings
                    .url
                    .clone()
                    .ok_or_else(|| StoreError::InvalidSettings("remote tier without url".into()))?;
                if settings.realtime {
                    let connector = self
                        .backends
                        .realtime
                        .as_ref()
                        .ok_or_else(|| StoreError::InvalidSettings("no realtime connector".into()))?;
                    let connection = connector.connect(&url).await?;
                    let (client, listener) = RealtimeClient::new(connection);
                    let backend = Backend::Remote {
                        url,
                        link: RemoteLink::Realtime(client),
                    };
                    let store = Arc::new(Datastore::new(settings.clone(), backend, self.this.clone()));
                    listener.spawn(Arc::downgrade(&store));
                    store
                } else {
                    let backend = Backend::Remote {
                        url,
                        link: RemoteLink::OneShot(Arc::clone(&self.backends.remote)),
                    };
                    Arc::new(Datastore::new(settings.clone(), backend, self.this.clone()))
                }
            }
        };

        if let Some(local) = &settings.local {
            let seed = match local {
                LocalData::Inline(value) => seed_datasets(value)?,
                LocalData::Url(url) => seed_datasets(&*self.loader.load(url.as_str()).await?)?,
            };
            debug!(store = %store.signature(), datasets = seed.len(), "seeding cache");
            store.seed(seed);
        }
        Ok(store)
    }
}

/// Seed data is an array of datasets, a single dataset, or an object
/// mapping keys to datasets.
fn seed_datasets(value: &Value) -> StoreResult<Vec<Dataset>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(dataset) => Ok(dataset.clone()),
                other => Err(StoreError::NotADataset(other.to_string())),
            })
            .collect(),
        Value::Object(map) if map.get("key").is_some_and(|k| !k.is_object()) => Ok(vec![map.clone()]),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| match item {
                Value::Object(dataset) => {
                    let mut dataset = dataset.clone();
                    dataset
                        .entry("key")
                        .or_insert_with(|| Value::String(key.clone()));
                    Ok(dataset)
                }
                other => Err(StoreError::NotADataset(other.to_string())),
            })
            .collect(),
        other => Err(StoreError::NotADataset(other.to_string())),
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeConnection;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use trellis_loader::{LoaderConfig, StaticFetcher};
    use trellis_protocol::{
        LineCodec, Notification, ProtocolResult, RealtimeRequest, ServerFrame, StoreResponse,
    };

    fn ds(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn registry_with_fetcher(fetcher: StaticFetcher, realtime: Option<Arc<dyn RealtimeConnector>>) -> Arc<StoreRegistry> {
        let loader = Arc::new(ResourceLoader::new(Arc::new(fetcher), LoaderConfig::default()));
        let backends = StoreBackends {
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(HttpTransport::default()),
            realtime,
        };
        StoreRegistry::new(loader, backends, ReplayOrder::Lifo)
    }

    fn registry() -> Arc<StoreRegistry> {
        registry_with_fetcher(StaticFetcher::new(), None)
    }

    #[tokio::test]
    async fn equal_signatures_share_a_store() {
        let registry = registry();
        let a = registry.store(&StoreSettings::local("users").in_db("main")).await.unwrap();
        let b = registry
            .store(&StoreSettings::local("users").in_db("main").seeded(LocalData::Inline(json!([]))))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.set(ds(json!({"key": "ada"}))).await.unwrap();
        assert!(b.cached("ada").is_some());

        let other = registry.store(&StoreSettings::local("users")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_opens_are_coalesced() {
        let registry = registry_with_fetcher(StaticFetcher::new().with("seed.json", json!([{"key": "a"}])), None);
        let settings = StoreSettings::local("s").seeded(LocalData::Url("seed.json".into()));
        let opens = (0..8).map(|_| registry.store(&settings));
        let stores = futures::future::try_join_all(opens).await.unwrap();
        for store in &stores[1..] {
            assert!(Arc::ptr_eq(&stores[0], store));
        }
        assert_eq!(stores[0].cache_len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn memory_tier_settings_share_one_store() {
        let registry = registry();
        let seeded = StoreSettings::memory(json!([{"key": "a", "v": 1}]));
        let a = registry.store(&seeded).await.unwrap();
        let b = registry.store(&StoreSettings::default()).await.unwrap();
        assert_eq!(seeded.signature(), StoreSettings::default().signature());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.cached("a").unwrap()["v"], json!(1));

        b.set(ds(json!({"key": "b", "v": 2}))).await.unwrap();
        assert_eq!(a.cached("b").unwrap()["v"], json!(2));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn local_tier_preloads_backing_data() {
        let local = Arc::new(MemoryLocalStore::new());
        let location = crate::local::StoreLocation::new(None, "users");
        local.put(&location, &ds(json!({"key": "ada", "v": 1}))).await.unwrap();

        let loader = Arc::new(ResourceLoader::new(Arc::new(StaticFetcher::new()), LoaderConfig::default()));
        let backends = StoreBackends {
            local,
            remote: Arc::new(HttpTransport::default()),
            realtime: None,
        };
        let registry = StoreRegistry::new(loader, backends, ReplayOrder::Fifo);
        let store = registry.store(&StoreSettings::local("users")).await.unwrap();
        assert_eq!(store.cache_len(), 1);
        assert_eq!(store.query(ds(json!({"v": 1}))).await.unwrap().len(), 1);
    }

    #[test]
    fn seed_shapes() {
        assert_eq!(seed_datasets(&json!([{"key": 1}, {"key": 2}])).unwrap().len(), 2);
        let keyed = seed_datasets(&json!({"a": {"v": 1}, "b": {"v": 2}})).unwrap();
        assert_eq!(keyed[0]["key"], json!("a"));
        assert_eq!(seed_datasets(&json!({"key": "solo", "v": 1})).unwrap().len(), 1);
        assert!(seed_datasets(&json!([1])).is_err());
        assert!(seed_datasets(&json!("text")).is_err());
    }

    #[tokio::test]
    async fn failed_open_is_not_registered() {
        let registry = registry();
        let settings = StoreSettings::local("s").seeded(LocalData::Url("missing.json".into()));
        assert!(matches!(registry.store(&settings).await, Err(StoreError::Load(_))));
        assert!(matches!(registry.lookup(&settings.signature()), Lookup::Absent));
    }

    #[tokio::test]
    async fn reset_forgets_stores() {
        let registry = registry();
        let a = registry.store(&StoreSettings::local("s")).await.unwrap();
        registry.reset();
        assert!(registry.is_empty());
        let b = registry.store(&StoreSettings::local("s")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    /// Serves `<n>ms.json` after `n` milliseconds, as a one-dataset seed
    /// keyed by the URL.
    struct DelayedFetcher;

    #[async_trait]
    impl trellis_loader::Fetcher for DelayedFetcher {
        async fn fetch(&self, spec: &trellis_loader::LoadSpec) -> trellis_loader::LoadResult<Value> {
            let millis = spec.url.trim_end_matches("ms.json").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!([{"key": spec.url.trim_end_matches(".json")}]))
        }
    }

    #[tokio::test]
    async fn opener_from_before_reset_leaves_new_waiters_alone() {
        let loader = Arc::new(ResourceLoader::new(Arc::new(DelayedFetcher), LoaderConfig::default()));
        let backends = StoreBackends {
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(HttpTransport::default()),
            realtime: None,
        };
        let registry = StoreRegistry::new(loader, backends, ReplayOrder::Lifo);
        let open = |seed: &str| {
            let registry = Arc::clone(&registry);
            let settings = StoreSettings::local("s").seeded(LocalData::Url(seed.into()));
            tokio::spawn(async move { registry.store(&settings).await })
        };
        let signature = StoreSettings::local("s").signature();

        let early = open("100ms.json");
        while !matches!(registry.lookup(&signature), Lookup::Pending) {
            tokio::task::yield_now().await;
        }
        registry.reset();

        let late = open("400ms.json");
        while !matches!(registry.lookup(&signature), Lookup::Pending) {
            tokio::task::yield_now().await;
        }
        let queued = open("unused.json");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let early = early.await.unwrap().unwrap();
        let late = late.await.unwrap().unwrap();
        let queued = queued.await.unwrap().unwrap();
        assert!(early.cached("100ms").is_some());
        assert!(!Arc::ptr_eq(&queued, &early));
        assert!(Arc::ptr_eq(&queued, &late));
        assert!(matches!(registry.lookup(&signature), Lookup::Ready(ref s) if Arc::ptr_eq(s, &late)));
    }

    #[tokio::test]
    async fn reset_fails_requests_queued_before_it() {
        let loader = Arc::new(ResourceLoader::new(Arc::new(DelayedFetcher), LoaderConfig::default()));
        let backends = StoreBackends {
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(HttpTransport::default()),
            realtime: None,
        };
        let registry = StoreRegistry::new(loader, backends, ReplayOrder::Fifo);
        let settings = StoreSettings::local("s").seeded(LocalData::Url("50ms.json".into()));

        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            let settings = settings.clone();
            async move { registry.store(&settings).await }
        });
        while !matches!(registry.lookup(&settings.signature()), Lookup::Pending) {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let registry = Arc::clone(&registry);
            let settings = settings.clone();
            async move { registry.store(&settings).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.reset();

        assert!(matches!(second.await.unwrap(), Err(StoreError::Unavailable(_))));
        assert!(first.await.unwrap().is_ok());
        assert!(registry.is_empty());
    }

    // -----------------------------------------------------------------------
    // Realtime
    // -----------------------------------------------------------------------

    /// Connector whose remote end is driven by the test.
    struct ChannelConnector {
        connects: AtomicUsize,
        remote: Mutex<Option<(mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)>>,
    }

    #[async_trait]
    impl RealtimeConnector for ChannelConnector {
        async fn connect(&self, _url: &str) -> ProtocolResult<RealtimeConnection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            *self.remote.lock().unwrap() = Some((out_rx, in_tx));
            Ok(RealtimeConnection {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }

    #[tokio::test]
    async fn realtime_store_round_trip_and_push() {
        let connector = Arc::new(ChannelConnector {
            connects: AtomicUsize::new(0),
            remote: Mutex::new(None),
        });
        let registry = registry_with_fetcher(StaticFetcher::new(), Some(connector.clone()));

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pushed);
        let settings = StoreSettings::remote("tcp://chat", "messages")
            .realtime()
            .on_change(Arc::new(move |n: &Notification| sink.lock().unwrap().push(n.clone())));
        let store = registry.store(&settings).await.unwrap();
        assert!(store.is_realtime());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        let (mut from_client, to_client) = connector.remote.lock().unwrap().take().unwrap();

        // Remote side: confirm the write.
        let server = tokio::spawn(async move {
            let line = from_client.recv().await.unwrap();
            let request: RealtimeRequest = LineCodec::decode(&line).unwrap();
            assert_eq!(request.callback, 0);
            assert_eq!(request.request.store_name.as_deref(), Some("messages"));
            let trellis_protocol::Operation::Write { dataset } = request.request.operation else {
                panic!("expected write");
            };
            let reply = ServerFrame::response(request.callback, &StoreResponse::Record(dataset));
            to_client.send(LineCodec::encode(&reply).unwrap()).unwrap();
            to_client
                .send(LineCodec::encode(&ServerFrame::changed(ds(json!({"key": "m2", "text": "hey"})))).unwrap())
                .unwrap();
            to_client
        });

        let stored = store.set(ds(json!({"key": "m1", "text": "hi"}))).await.unwrap();
        assert_eq!(stored["text"], json!("hi"));
        let _to_client = server.await.unwrap();

        for _ in 0..100 {
            if store.cached("m2").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.cached("m2").unwrap()["text"], json!("hey"));
        assert_eq!(pushed.lock().unwrap().len(), 1);
        assert_eq!(store.cache_len(), 2);
    }

    #[tokio::test]
    async fn realtime_without_connector_fails() {
        let registry = registry();
        let settings = StoreSettings::remote("tcp://x", "s").realtime();
        assert!(matches!(
            registry.store(&settings).await,
            Err(StoreError::InvalidSettings(_))
        ));
    }
}
