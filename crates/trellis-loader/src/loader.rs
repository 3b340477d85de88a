use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use trellis_types::Waitlist;

use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::fetcher::Fetcher;
use crate::spec::LoadSpec;

/// A loaded resource. Shared, so every caller coalesced onto the same load
/// observes the identical value.
pub type Resource = Arc<Value>;

type Waiter = oneshot::Sender<LoadResult<Resource>>;

struct LoaderState {
    cache: HashMap<String, Resource>,
    inflight: Waitlist<String, Waiter>,
    /// Bumped by `reset`; results of loads begun before a reset are not cached.
    generation: u64,
}

/// Loads each resource at most once and coalesces concurrent requests.
///
/// All state lives behind a mutex that is never held across an await.
pub struct ResourceLoader {
    fetcher: Arc<dyn Fetcher>,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
}

/// Closes an in-flight entry if the fetching future is dropped before it
/// completes, so queued waiters observe [`LoadError::Abandoned`] instead of
/// hanging.
struct InflightGuard<'a> {
    loader: &'a ResourceLoader,
    key: &'a str,
    armed: bool,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.loader.state.lock().expect("loader lock poisoned");
            let abandoned = state.inflight.finish(&self.key.to_string());
            warn!(key = self.key, waiters = abandoned.len(), "in-flight load dropped");
        }
    }
}

impl ResourceLoader {
    /// Create a loader with an empty cache.
    pub fn new(fetcher: Arc<dyn Fetcher>, config: LoaderConfig) -> Self {
        let inflight = Waitlist::new(config.replay_order);
        Self {
            fetcher,
            config,
            state: Mutex::new(LoaderState {
                cache: HashMap::new(),
                inflight,
                generation: 0,
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a single resource.
    ///
    /// Served from cache when possible (unless `ignore_cache` is set).
    /// If a load of the same resource is already in flight, this call waits
    /// for it and receives the same result.
    pub async fn load(&self, spec: impl Into<LoadSpec>) -> LoadResult<Resource> {
        let mut spec = spec.into();
        spec.url = self.config.resolve_url(&spec.url);
        let key = spec.cache_key();

        let (pending, generation) = {
            let mut state = self.state.lock().expect("loader lock poisoned");
            if !spec.ignore_cache {
                if let Some(hit) = state.cache.get(&key) {
                    trace!(key = %key, "resource cache hit");
                    return Ok(Arc::clone(hit));
                }
            }
            if state.inflight.begin(key.clone()) {
                (None, state.generation)
            } else {
                let (tx, rx) = oneshot::channel();
                // `begin` just failed, so the key is in flight and `defer` accepts.
                let _ = state.inflight.defer(&key, tx);
                (Some(rx), state.generation)
            }
        };

        if let Some(rx) = pending {
            debug!(key = %key, "joining in-flight load");
            return rx.await.unwrap_or(Err(LoadError::Abandoned(key)));
        }

        let mut guard = InflightGuard {
            loader: self,
            key: &key,
            armed: true,
        };
        let result = self.fetch_bounded(&spec).await.map(Arc::new);
        guard.armed = false;

        let waiters = {
            let mut state = self.state.lock().expect("loader lock poisoned");
            if let Ok(resource) = &result {
                if state.generation == generation {
                    state.cache.insert(key.clone(), Arc::clone(resource));
                }
            }
            state.inflight.finish(&key)
        };
        drop(guard);

        debug!(key = %key, waiters = waiters.len(), ok = result.is_ok(), "load finished");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Load several resources concurrently, preserving input order.
    pub async fn load_all<I, S>(&self, specs: I) -> LoadResult<Vec<Resource>>
    where
        I: IntoIterator<Item = S>,
        S: Into<LoadSpec>,
    {
        let loads = specs.into_iter().map(|spec| self.load(spec));
        futures::future::try_join_all(loads).await
    }

    /// The cached resource for `spec`, without loading.
    pub fn cached(&self, spec: impl Into<LoadSpec>) -> Option<Resource> {
        let mut spec = spec.into();
        spec.url = self.config.resolve_url(&spec.url);
        let state = self.state.lock().expect("loader lock poisoned");
        state.cache.get(&spec.cache_key()).cloned()
    }

    /// Returns `true` while a load for `spec` is in flight.
    pub fn is_loading(&self, spec: impl Into<LoadSpec>) -> bool {
        let mut spec = spec.into();
        spec.url = self.config.resolve_url(&spec.url);
        let state = self.state.lock().expect("loader lock poisoned");
        state.inflight.is_pending(&spec.cache_key())
    }

    /// Number of cached resources.
    pub fn cache_len(&self) -> usize {
        self.state.lock().expect("loader lock poisoned").cache.len()
    }

    /// Drop every cached resource. Loads in flight still complete for their
    /// callers but are not cached.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("loader lock poisoned");
        state.cache.clear();
        state.generation += 1;
        debug!(generation = state.generation, "resource cache reset");
    }

    async fn fetch_bounded(&self, spec: &LoadSpec) -> LoadResult<Value> {
        let fetch = self.fetcher.fetch(spec);
        match self.config.stall_timeout_ms {
            Some(timeout_ms) => {
                let limit = std::time::Duration::from_millis(timeout_ms);
                tokio::time::timeout(limit, fetch)
                    .await
                    .unwrap_or_else(|_| {
                        warn!(url = %spec.url, timeout_ms, "resource load stalled");
                        Err(LoadError::Stalled {
                            url: spec.url.clone(),
                            timeout_ms,
                        })
                    })
            }
            None => fetch.await,
        }
    }
}

impl std::fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("cached", &self.cache_len())
            .field("config", &self.config)
            .finish()
    }
}
