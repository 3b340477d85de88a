use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};
use trellis_protocol::{Notification, StoreRequest, StoreResponse};
use trellis_types::{dataset_key, generate_key, integrate, Dataset, DatasetKey, Query};

use crate::error::{StoreError, StoreResult};
use crate::local::{LocalStore, StoreLocation};
use crate::realtime::RealtimeClient;
use crate::registry::StoreRegistry;
use crate::remote::RemoteTransport;
use crate::resolve;
use crate::settings::{Signature, StoreSettings, Tier};

/// Result of a [`Datastore::fetch`]: one dataset (or none) for a key
/// lookup, a list for query mode.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched {
    One(Option<Dataset>),
    Many(Vec<Dataset>),
}

impl Fetched {
    pub fn to_json(&self) -> Value {
        match self {
            Self::One(Some(dataset)) => Value::Object(dataset.clone()),
            Self::One(None) => Value::Null,
            Self::Many(datasets) => Value::Array(datasets.iter().cloned().map(Value::Object).collect()),
        }
    }

    pub fn into_one(self) -> Option<Dataset> {
        match self {
            Self::One(dataset) => dataset,
            Self::Many(datasets) => datasets.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Dataset> {
        match self {
            Self::One(dataset) => dataset.into_iter().collect(),
            Self::Many(datasets) => datasets,
        }
    }
}

pub(crate) enum RemoteLink {
    OneShot(Arc<dyn RemoteTransport>),
    Realtime(RealtimeClient),
}

pub(crate) enum Backend {
    Memory,
    Local {
        store: Arc<dyn LocalStore>,
        location: StoreLocation,
    },
    Remote {
        url: String,
        link: RemoteLink,
    },
}

/// A datastore: one cache plus the backing tier its settings select.
///
/// Datastores are opened through a [`StoreRegistry`], which guarantees one
/// instance per signature. The cache is shared by every holder.
pub struct Datastore {
    settings: StoreSettings,
    signature: Signature,
    tier: Tier,
    cache: RwLock<IndexMap<String, Dataset>>,
    backend: Backend,
    registry: Weak<StoreRegistry>,
}

impl Datastore {
    pub(crate) fn new(settings: StoreSettings, backend: Backend, registry: Weak<StoreRegistry>) -> Self {
        Self {
            signature: settings.signature(),
            tier: settings.tier(),
            settings,
            cache: RwLock::new(IndexMap::new()),
            backend,
            registry,
        }
    }

    /// Settings the store was first opened with.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Identity under which the registry shares this store.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Backing tier, fixed at open.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Whether a realtime connection backs this store.
    pub fn is_realtime(&self) -> bool {
        matches!(
            self.backend,
            Backend::Remote {
                link: RemoteLink::Realtime(_),
                ..
            }
        )
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The dataset stored at `key`, with its data dependencies resolved.
    pub async fn get(&self, key: impl Into<DatasetKey>) -> StoreResult<Option<Dataset>> {
        Ok(self.fetch(Query::Key(key.into())).await?.into_one())
    }

    /// Every dataset of which `filter` is a structural subset.
    pub async fn query(&self, filter: Dataset) -> StoreResult<Vec<Dataset>> {
        Ok(self.fetch(Query::Match(filter)).await?.into_many())
    }

    /// Every dataset in the store.
    pub async fn all(&self) -> StoreResult<Vec<Dataset>> {
        Ok(self.fetch(Query::All).await?.into_many())
    }

    /// Run a query against this store.
    ///
    /// Key lookups try the cache first and fall back to the backing tier,
    /// caching what it returns. Query mode scans the cache, except on the
    /// remote tier where it is always forwarded. Every returned dataset has
    /// its `get` data dependencies resolved.
    pub async fn fetch(&self, query: Query) -> StoreResult<Fetched> {
        self.fetch_traced(query, Vec::new()).await
    }

    /// `fetch` carrying the chain of dependencies being resolved, so that
    /// reference cycles are cut.
    pub(crate) fn fetch_traced(&self, query: Query, trail: Vec<String>) -> BoxFuture<'_, StoreResult<Fetched>> {
        async move {
            match query {
                Query::Key(key) => {
                    key.validate()?;
                    let found = self.lookup_key(&key).await?;
                    match found {
                        Some(dataset) => {
                            let resolved = self.resolve(dataset, &trail).await?;
                            Ok(Fetched::One(Some(resolved)))
                        }
                        None => Ok(Fetched::One(None)),
                    }
                }
                query => {
                    let found = self.scan(&query).await?;
                    let resolving = found.into_iter().map(|dataset| self.resolve(dataset, &trail));
                    let resolved = futures::future::try_join_all(resolving).await?;
                    Ok(Fetched::Many(resolved))
                }
            }
        }
        .boxed()
    }

    async fn lookup_key(&self, key: &DatasetKey) -> StoreResult<Option<Dataset>> {
        let cache_key = key.cache_key();
        if let Some(hit) = self.cached_raw(&cache_key) {
            trace!(store = %self.signature, key = %cache_key, "cache hit");
            return Ok(Some(hit));
        }
        let fetched = match &self.backend {
            Backend::Memory => None,
            Backend::Local { store, location } => store.get(location, key).await?,
            Backend::Remote { .. } => {
                let response = self.request(StoreRequest::read(&Query::Key(key.clone()))).await?;
                expect_records(response, "read")?.into_iter().next()
            }
        };
        if let Some(dataset) = &fetched {
            self.cache_insert(cache_key, dataset.clone());
        }
        Ok(fetched)
    }

    async fn scan(&self, query: &Query) -> StoreResult<Vec<Dataset>> {
        if let Backend::Remote { .. } = self.backend {
            let response = self.request(StoreRequest::read(query)).await?;
            let records = expect_records(response, "query")?;
            for dataset in &records {
                if let Some(key) = dataset_key(dataset) {
                    self.cache_insert(key.cache_key(), dataset.clone());
                }
            }
            return Ok(records);
        }
        let cache = self.cache.read().expect("lock poisoned");
        Ok(cache.values().filter(|d| query.matches(d)).cloned().collect())
    }

    async fn resolve(&self, dataset: Dataset, trail: &[String]) -> StoreResult<Dataset> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(dataset);
        };
        let mut trail = trail.to_vec();
        if let Some(key) = dataset_key(&dataset) {
            trail.push(resolve::trail_entry(&self.signature, &Query::Key(key)));
        }
        resolve::resolve_dataset(&registry, dataset, trail).await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store `priority` data.
    ///
    /// A missing key is generated. An existing dataset at the key is
    /// updated field by field (dot paths allowed); otherwise the data is
    /// inserted. Backed tiers are written first and the cache follows only
    /// on success. Returns the stored dataset.
    pub async fn set(&self, priority: Dataset) -> StoreResult<Dataset> {
        let mut priority = priority;
        let key = match priority.get("key") {
            None | Some(Value::Null) => {
                let generated = generate_key();
                priority.insert("key".into(), Value::String(generated.clone()));
                DatasetKey::Text(generated)
            }
            Some(raw) => DatasetKey::from_json(raw).ok_or_else(|| StoreError::InvalidKey(raw.to_string()))?,
        };
        if let Err(e) = key.validate() {
            warn!(store = %self.signature, key = %key, "rejected dataset with invalid key");
            return Err(e.into());
        }
        let cache_key = key.cache_key();

        let existing = match (self.cached_raw(&cache_key), &self.backend) {
            (Some(hit), _) => Some(hit),
            (None, Backend::Local { store, location }) => store.get(location, &key).await?,
            (None, _) => None,
        };
        let merged = match existing {
            Some(mut current) => {
                integrate(&priority, &mut current);
                current
            }
            None => priority.clone(),
        };

        let stored = match &self.backend {
            Backend::Memory => merged,
            Backend::Local { store, location } => {
                store.put(location, &merged).await?;
                merged
            }
            Backend::Remote { .. } => match self.request(StoreRequest::write(priority)).await? {
                StoreResponse::Error(message) => {
                    return Err(StoreError::Remote {
                        operation: "write",
                        message,
                    })
                }
                StoreResponse::Record(confirmed) => confirmed,
                _ => merged,
            },
        };

        debug!(store = %self.signature, key = %cache_key, tier = %self.tier, "dataset stored");
        self.cache_insert(cache_key, stored.clone());
        Ok(stored)
    }

    /// Delete the dataset at `key`, backing tier first. Returns what was
    /// deleted.
    pub async fn del(&self, key: impl Into<DatasetKey>) -> StoreResult<Option<Dataset>> {
        let key = key.into();
        key.validate()?;
        let removed_remotely = match &self.backend {
            Backend::Memory => None,
            Backend::Local { store, location } => store.delete(location, &key).await?,
            Backend::Remote { .. } => match self.request(StoreRequest::delete(key.clone())).await? {
                StoreResponse::Error(message) => {
                    return Err(StoreError::Remote {
                        operation: "delete",
                        message,
                    })
                }
                StoreResponse::Record(dataset) => Some(dataset),
                _ => None,
            },
        };
        let removed = self
            .cache
            .write()
            .expect("lock poisoned")
            .shift_remove(&key.cache_key());
        debug!(store = %self.signature, key = %key, "dataset deleted");
        Ok(removed_remotely.or(removed))
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    /// The cached dataset at `key`, without touching the backing tier or
    /// resolving data dependencies.
    pub fn cached(&self, key: impl Into<DatasetKey>) -> Option<Dataset> {
        self.cached_raw(&key.into().cache_key())
    }

    /// Snapshot of the whole cache.
    pub fn cached_all(&self) -> Vec<Dataset> {
        self.cache.read().expect("lock poisoned").values().cloned().collect()
    }

    /// Number of cached datasets.
    pub fn cache_len(&self) -> usize {
        self.cache.read().expect("lock poisoned").len()
    }

    /// Put datasets into the cache only. Datasets without a usable key get
    /// a generated one.
    pub(crate) fn seed(&self, datasets: Vec<Dataset>) {
        let mut cache = self.cache.write().expect("lock poisoned");
        for mut dataset in datasets {
            let key = match dataset_key(&dataset) {
                Some(key) if key.is_valid() => key.cache_key(),
                Some(key) => {
                    warn!(store = %self.signature, key = %key, "skipping seed dataset with invalid key");
                    continue;
                }
                None => {
                    let generated = generate_key();
                    dataset.insert("key".into(), Value::String(generated.clone()));
                    generated
                }
            };
            cache.insert(key, dataset);
        }
    }

    /// Merge a change announced by the remote into the cache and pass it to
    /// the change hook.
    pub fn apply_notification(&self, notification: Notification) {
        match &notification {
            Notification::Changed(dataset) => match dataset_key(dataset) {
                Some(key) => {
                    let mut cache = self.cache.write().expect("lock poisoned");
                    match cache.get_mut(&key.cache_key()) {
                        Some(current) => integrate(dataset, current),
                        None => {
                            cache.insert(key.cache_key(), dataset.clone());
                        }
                    }
                }
                None => {
                    warn!(store = %self.signature, "push notification without key");
                    return;
                }
            },
            Notification::Deleted(key) => {
                self.cache
                    .write()
                    .expect("lock poisoned")
                    .shift_remove(&key.cache_key());
            }
        }
        debug!(store = %self.signature, key = ?notification.key(), "applied push notification");
        if let Some(hook) = &self.settings.on_change {
            hook(&notification);
        }
    }

    fn cached_raw(&self, cache_key: &str) -> Option<Dataset> {
        self.cache.read().expect("lock poisoned").get(cache_key).cloned()
    }

    fn cache_insert(&self, cache_key: String, dataset: Dataset) {
        self.cache.write().expect("lock poisoned").insert(cache_key, dataset);
    }

    // -----------------------------------------------------------------------
    // Remote
    // -----------------------------------------------------------------------

    async fn request(&self, request: StoreRequest) -> StoreResult<StoreResponse> {
        let Backend::Remote { url, link } = &self.backend else {
            return Err(StoreError::InvalidSettings("not a remote store".into()));
        };
        let mut request = request.in_store(self.settings.store_name.clone(), self.settings.db_name.clone());
        if let Some(auth) = &self.settings.auth {
            if let Some(credentials) = auth.credentials().await? {
                request = request.with_credentials(credentials.user, credentials.token);
            }
        }
        trace!(url = %url, kind = request.kind(), "remote request");
        match link {
            RemoteLink::OneShot(transport) => Ok(transport.send(url, &request).await?),
            RemoteLink::Realtime(client) => client.request(request).await,
        }
    }
}

fn expect_records(response: StoreResponse, operation: &'static str) -> StoreResult<Vec<Dataset>> {
    match response {
        StoreResponse::Error(message) => Err(StoreError::Remote { operation, message }),
        other => Ok(other.into_records().unwrap_or_default()),
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("signature", &self.signature)
            .field("tier", &self.tier)
            .field("cached", &self.cache_len())
            .finish()
    }
}
