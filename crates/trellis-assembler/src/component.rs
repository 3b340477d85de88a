use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use crate::error::AssembleResult;
use crate::instance::Instance;

/// Lifecycle hooks of a component. Every hook runs at most once per
/// instance; the defaults do nothing.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Runs after the whole graph is resolved, parents before children.
    async fn init(&self, _instance: &Arc<Instance>) -> AssembleResult<()> {
        Ok(())
    }

    /// Runs after `init`, children before their parent.
    async fn ready(&self, _instance: &Arc<Instance>) -> AssembleResult<()> {
        Ok(())
    }

    /// Runs after `ready` for instances requested with `start`.
    async fn start(&self, _instance: &Arc<Instance>) -> AssembleResult<()> {
        Ok(())
    }
}

/// A behavior without hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBehavior;

impl Behavior for NoBehavior {}

/// Name plus optional version, rendered `name` or `name-1-2-0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentIndex {
    pub name: String,
    pub version: Option<String>,
}

impl ComponentIndex {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ComponentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{}", self.name, version.replace('.', "-")),
            None => f.write_str(&self.name),
        }
    }
}

/// Declaration of a component, inline or as a fetched JSON manifest
/// (`{name, version?, behavior?, config?, private?}`).
#[derive(Clone, Default, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Name of a behavior defined on the component registry.
    #[serde(default, rename = "behavior")]
    pub behavior_name: Option<String>,
    /// Default configuration. May contain dependency descriptors.
    #[serde(default)]
    pub config: Map<String, Json>,
    /// Configuration keys moved out of the public view.
    #[serde(default)]
    pub private: Vec<String>,
    #[serde(skip)]
    pub behavior: Option<Arc<dyn Behavior>>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the default configuration. Non-object values are ignored.
    pub fn config(mut self, config: Json) -> Self {
        if let Json::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn private<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn behavior(mut self, behavior: Arc<dyn Behavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn named_behavior(mut self, name: impl Into<String>) -> Self {
        self.behavior_name = Some(name.into());
        self
    }

    pub fn index(&self) -> ComponentIndex {
        ComponentIndex::new(self.name.clone(), self.version.clone())
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("behavior_name", &self.behavior_name)
            .field("config", &self.config)
            .field("private", &self.private)
            .finish()
    }
}

/// A registered component. One exists per distinct index.
pub struct ComponentDefinition {
    index: ComponentIndex,
    config: Map<String, Json>,
    private: Vec<String>,
    behavior: Arc<dyn Behavior>,
    instances: AtomicU64,
}

impl ComponentDefinition {
    pub(crate) fn new(spec: ComponentSpec, behavior: Arc<dyn Behavior>) -> Self {
        Self {
            index: spec.index(),
            config: spec.config,
            private: spec.private,
            behavior,
            instances: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> &ComponentIndex {
        &self.index
    }

    pub fn default_config(&self) -> &Map<String, Json> {
        &self.config
    }

    pub fn private_keys(&self) -> &[String] {
        &self.private
    }

    pub fn behavior(&self) -> &Arc<dyn Behavior> {
        &self.behavior
    }

    /// Number of instances created so far.
    pub fn instance_count(&self) -> u64 {
        self.instances.load(Ordering::SeqCst)
    }

    /// Id for the next instance. The first is 1.
    pub(crate) fn next_id(&self) -> u64 {
        self.instances.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("index", &self.index.to_string())
            .field("private", &self.private)
            .field("instances", &self.instance_count())
            .finish()
    }
}

/// How a dependency names its component.
#[derive(Clone)]
pub enum ComponentRef {
    /// A registered index such as `chat-2-1-0`.
    Index(String),
    Inline(ComponentSpec),
    /// URL of a JSON manifest, fetched through the resource loader.
    Url(String),
    Definition(Arc<ComponentDefinition>),
}

impl ComponentRef {
    /// Interpret a JSON reference. Strings containing `/` or ending in
    /// `.json` are manifest URLs, other strings are indexes, objects are
    /// inline specs.
    pub fn from_json(value: &Json) -> Option<Self> {
        match value {
            Json::String(s) => Some(Self::from(s.as_str())),
            Json::Object(_) => serde_json::from_value(value.clone()).ok().map(Self::Inline),
            _ => None,
        }
    }

    /// Human-readable name, for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Index(index) | Self::Url(index) => index.clone(),
            Self::Inline(spec) => spec.index().to_string(),
            Self::Definition(def) => def.index().to_string(),
        }
    }
}

impl From<&str> for ComponentRef {
    fn from(s: &str) -> Self {
        if s.contains('/') || s.ends_with(".json") {
            Self::Url(s.to_string())
        } else {
            Self::Index(s.to_string())
        }
    }
}

impl From<ComponentSpec> for ComponentRef {
    fn from(spec: ComponentSpec) -> Self {
        Self::Inline(spec)
    }
}

impl From<Arc<ComponentDefinition>> for ComponentRef {
    fn from(def: Arc<ComponentDefinition>) -> Self {
        Self::Definition(def)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "Index({index})"),
            Self::Inline(spec) => write!(f, "Inline({})", spec.index()),
            Self::Url(url) => write!(f, "Url({url})"),
            Self::Definition(def) => write!(f, "Definition({})", def.index()),
        }
    }
}
