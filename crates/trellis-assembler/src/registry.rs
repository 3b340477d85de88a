use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as Json;
use tokio::sync::oneshot;
use tracing::{debug, info};
use trellis_loader::ResourceLoader;
use trellis_types::{ReplayOrder, Waitlist};

use crate::component::{Behavior, ComponentDefinition, ComponentRef, ComponentSpec, NoBehavior};
use crate::error::{AssembleError, AssembleResult};

type Waiter = oneshot::Sender<AssembleResult<Arc<ComponentDefinition>>>;

struct RegistryState {
    by_index: HashMap<String, Arc<ComponentDefinition>>,
    by_url: HashMap<String, Arc<ComponentDefinition>>,
    pending: Waitlist<String, Waiter>,
}

/// Component definitions by index, plus the named behaviors manifests can
/// bind to.
///
/// Manifest URLs are loaded at most once; concurrent resolutions of the
/// same URL wait for the first.
pub struct ComponentRegistry {
    loader: Arc<ResourceLoader>,
    behaviors: RwLock<HashMap<String, Arc<dyn Behavior>>>,
    state: Mutex<RegistryState>,
}

impl ComponentRegistry {
    /// Create an empty registry loading manifests through `loader`.
    pub fn new(loader: Arc<ResourceLoader>, replay_order: ReplayOrder) -> Self {
        Self {
            loader,
            behaviors: RwLock::new(HashMap::new()),
            state: Mutex::new(RegistryState {
                by_index: HashMap::new(),
                by_url: HashMap::new(),
                pending: Waitlist::new(replay_order),
            }),
        }
    }

    /// Make `behavior` available to manifests under `name`.
    pub fn define_behavior(&self, name: impl Into<String>, behavior: Arc<dyn Behavior>) {
        self.behaviors
            .write()
            .expect("lock poisoned")
            .insert(name.into(), behavior);
    }

    /// Register a component. Registering an index that already exists
    /// returns the existing definition unchanged.
    pub fn register(&self, spec: ComponentSpec) -> AssembleResult<Arc<ComponentDefinition>> {
        let index = spec.index().to_string();
        if let Some(existing) = self.get(&index) {
            return Ok(existing);
        }
        let behavior = match (&spec.behavior, &spec.behavior_name) {
            (Some(behavior), _) => Arc::clone(behavior),
            (None, Some(name)) => self
                .behaviors
                .read()
                .expect("lock poisoned")
                .get(name)
                .cloned()
                .ok_or_else(|| AssembleError::MissingBehavior(name.clone()))?,
            (None, None) => Arc::new(NoBehavior),
        };

        let mut state = self.state.lock().expect("lock poisoned");
        let definition = state
            .by_index
            .entry(index.clone())
            .or_insert_with(|| Arc::new(ComponentDefinition::new(spec, behavior)));
        debug!(component = %index, "component registered");
        Ok(Arc::clone(definition))
    }

    /// The registered definition at `index`, if any.
    pub fn get(&self, index: &str) -> Option<Arc<ComponentDefinition>> {
        self.state
            .lock()
            .expect("lock poisoned")
            .by_index
            .get(index)
            .cloned()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The definition a reference names, registering or loading it first
    /// when needed.
    pub async fn resolve(&self, component: &ComponentRef) -> AssembleResult<Arc<ComponentDefinition>> {
        match component {
            ComponentRef::Definition(definition) => Ok(Arc::clone(definition)),
            ComponentRef::Index(index) => self
                .get(index)
                .ok_or_else(|| AssembleError::UnknownComponent(index.clone())),
            ComponentRef::Inline(spec) => self.register(spec.clone()),
            ComponentRef::Url(url) => self.load_manifest(url).await,
        }
    }

    async fn load_manifest(&self, url: &str) -> AssembleResult<Arc<ComponentDefinition>> {
        let key = url.to_string();
        let pending = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(definition) = state.by_url.get(&key) {
                return Ok(Arc::clone(definition));
            }
            if state.pending.begin(key.clone()) {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let _ = state.pending.defer(&key, tx);
                Some(rx)
            }
        };
        if let Some(rx) = pending {
            debug!(url, "waiting for component manifest");
            return rx
                .await
                .unwrap_or_else(|_| Err(AssembleError::Unavailable(key)));
        }

        let result = self.fetch_manifest(url).await;
        let waiters = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Ok(definition) = &result {
                state.by_url.insert(key.clone(), Arc::clone(definition));
            }
            state.pending.finish(&key)
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    async fn fetch_manifest(&self, url: &str) -> AssembleResult<Arc<ComponentDefinition>> {
        let resource = self.loader.load(url).await.map_err(|source| AssembleError::Load {
            path: url.to_string(),
            source,
        })?;
        let spec: ComponentSpec = match &*resource {
            Json::Object(_) => serde_json::from_value((*resource).clone()).map_err(|e| {
                AssembleError::InvalidManifest {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?,
            other => {
                return Err(AssembleError::InvalidManifest {
                    url: url.to_string(),
                    reason: format!("expected an object, got {other}"),
                })
            }
        };
        let definition = self.register(spec)?;
        info!(url, component = %definition.index(), "component manifest loaded");
        Ok(definition)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.len())
            .finish()
    }
}
