use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::{Map, Value as Json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::assembler::Assembler;
use crate::component::{ComponentDefinition, ComponentRef};
use crate::context::Context;
use crate::error::AssembleResult;
use crate::value::{slot_mut, Config, Segment, Value};

/// A constructed component instance.
///
/// Configuration is split at construction: keys the component declares
/// private are only reachable through [`Instance::private`].
pub struct Instance {
    id: u64,
    index: String,
    parent: Weak<Instance>,
    component: Arc<ComponentDefinition>,
    public: RwLock<Config>,
    private: RwLock<Config>,
    initialized: AtomicBool,
    readied: AtomicBool,
    started: AtomicBool,
}

impl Instance {
    pub(crate) fn new(component: Arc<ComponentDefinition>, config: Config, parent: Option<&Arc<Instance>>) -> Self {
        let id = component.next_id();
        let index = format!("{}-{id}", component.index());
        let mut public = config;
        let mut private = Config::new();
        for key in component.private_keys() {
            if let Some(value) = public.shift_remove(key) {
                private.insert(key.clone(), value);
            }
        }
        Self {
            id,
            index,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            component,
            public: RwLock::new(public),
            private: RwLock::new(private),
            initialized: AtomicBool::new(false),
            readied: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Process-unique instance number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Component index plus instance id, e.g. `chat-1-0-0-3`.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Definition this instance was built from.
    pub fn component(&self) -> &Arc<ComponentDefinition> {
        &self.component
    }

    /// The instance whose configuration required this one, if still alive.
    pub fn parent(&self) -> Option<Arc<Instance>> {
        self.parent.upgrade()
    }

    /// A public configuration property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.public.read().expect("lock poisoned").get(key).cloned()
    }

    /// Replace the value at `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.public
            .write()
            .expect("lock poisoned")
            .insert(key.into(), value);
    }

    /// A private configuration property, for the component's behavior.
    pub fn private(&self, key: &str) -> Option<Value> {
        self.private.read().expect("lock poisoned").get(key).cloned()
    }

    /// Configuration keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.public.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// JSON view of the public configuration.
    pub fn to_json(&self) -> Json {
        let public = self.public.read().expect("lock poisoned");
        Json::Object(public.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.readied.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Snapshot of public and private configuration, for the dependency walk.
    pub(crate) fn snapshot(&self) -> (Config, Config) {
        let public = self.public.read().expect("lock poisoned").clone();
        let private = self.private.read().expect("lock poisoned").clone();
        (public, private)
    }

    /// Replace the value at `path`, in whichever half holds its first key.
    pub(crate) fn splice(&self, path: &[Segment], value: Value) -> bool {
        for half in [&self.public, &self.private] {
            let mut config = half.write().expect("lock poisoned");
            if let Some(slot) = slot_mut(&mut config, path) {
                *slot = value;
                return true;
            }
        }
        false
    }

    pub(crate) async fn init_once(self: &Arc<Self>) -> AssembleResult<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            debug!(instance = %self.index, "init");
            self.component.behavior().init(self).await?;
        }
        Ok(())
    }

    pub(crate) async fn ready_once(self: &Arc<Self>) -> AssembleResult<()> {
        if !self.readied.swap(true, Ordering::SeqCst) {
            debug!(instance = %self.index, "ready");
            self.component.behavior().ready(self).await?;
        }
        Ok(())
    }

    pub(crate) async fn start_once(self: &Arc<Self>) -> AssembleResult<()> {
        if !self.started.swap(true, Ordering::SeqCst) {
            debug!(instance = %self.index, "start");
            self.component.behavior().start(self).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("index", &self.index)
            .field("parent", &self.parent.upgrade().map(|p| p.index.clone()))
            .field("keys", &self.keys())
            .finish()
    }
}

/// A resolved component, ready to build instances.
///
/// Instances built through a handle get the handle's configuration as
/// defaults and the instance that resolved the handle as parent.
#[derive(Clone)]
pub struct ComponentHandle {
    definition: Arc<ComponentDefinition>,
    config: Config,
    parent: Weak<Instance>,
    context: Arc<Context>,
}

impl ComponentHandle {
    pub(crate) fn new(
        definition: Arc<ComponentDefinition>,
        config: Config,
        parent: Weak<Instance>,
        context: Arc<Context>,
    ) -> Self {
        Self {
            definition,
            config,
            parent,
            context,
        }
    }

    /// Index of the handled component.
    pub fn index(&self) -> String {
        self.definition.index().to_string()
    }

    /// Defaults layered under every instance built through this handle.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    /// Build an instance with `config` over the handle defaults.
    pub async fn instance(&self, config: Config) -> AssembleResult<Arc<Instance>> {
        self.build(config, false).await
    }

    /// Build and start an instance.
    pub async fn start(&self, config: Config) -> AssembleResult<Arc<Instance>> {
        self.build(config, true).await
    }

    async fn build(&self, config: Config, start: bool) -> AssembleResult<Arc<Instance>> {
        Assembler::new(Arc::clone(&self.context))
            .run(
                ComponentRef::Definition(Arc::clone(&self.definition)),
                vec![self.config.clone(), config],
                self.parent.upgrade(),
                start,
            )
            .await
    }
}

/// An instance built on first [`force`](LazyInstance::force).
///
/// Clones share the same instance.
#[derive(Clone)]
pub struct LazyInstance {
    component: ComponentRef,
    config: Config,
    parent: Weak<Instance>,
    context: Arc<Context>,
    cell: Arc<OnceCell<Arc<Instance>>>,
}

impl LazyInstance {
    pub(crate) fn new(component: ComponentRef, config: Config, parent: Weak<Instance>, context: Arc<Context>) -> Self {
        Self {
            component,
            config,
            parent,
            context,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Build the instance, or return the one already built.
    pub async fn force(&self) -> AssembleResult<Arc<Instance>> {
        let instance = self
            .cell
            .get_or_try_init(|| {
                Assembler::new(Arc::clone(&self.context)).run(
                    self.component.clone(),
                    vec![self.config.clone()],
                    self.parent.upgrade(),
                    false,
                )
            })
            .await?;
        Ok(Arc::clone(instance))
    }

    /// The instance, if already forced.
    pub fn get(&self) -> Option<Arc<Instance>> {
        self.cell.get().cloned()
    }

    pub fn is_forced(&self) -> bool {
        self.cell.initialized()
    }

    pub fn describe(&self) -> String {
        self.component.describe()
    }
}
