use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};
use trellis_loader::{LoadSpec, Resource};
use trellis_store::{Datastore, StoreSettings};
use trellis_types::{Dataset, DatasetKey, Query};

use crate::component::ComponentRef;
use crate::instance::{ComponentHandle, Instance, LazyInstance};

/// Configuration of an instance: property name to value.
pub type Config = IndexMap<String, Value>;

/// Parse a JSON object into a [`Config`], recognising dependency
/// descriptors. Non-object JSON gives an empty config.
pub fn config(json: Json) -> Config {
    match Value::parse(&json) {
        Value::Object(map) => map,
        _ => Config::new(),
    }
}

/// An instruction embedded in configuration, replaced by its result during
/// assembly.
#[derive(Clone, Debug)]
pub enum Dependency {
    /// Fetch a resource.
    Load(LoadSpec),
    /// Resolve a component into a [`ComponentHandle`].
    Component { component: ComponentRef, config: Config },
    /// Build a nested instance.
    Instance { component: ComponentRef, config: Config },
    /// Build a nested instance and run its `start` hook.
    Start { component: ComponentRef, config: Config },
    /// A [`LazyInstance`] built on demand.
    Proxy { component: ComponentRef, config: Config },
    /// Open a datastore.
    Store(StoreSettings),
    Get { settings: StoreSettings, query: Query },
    Set { settings: StoreSettings, dataset: Dataset },
    Del { settings: StoreSettings, key: DatasetKey },
}

impl Dependency {
    /// Recognise a tagged array such as `["load", "style.css"]` or
    /// `["instance", "chat", {...}]`. Returns `None` for anything else,
    /// including arrays with a known tag but malformed arguments.
    pub fn parse(value: &Json) -> Option<Self> {
        let Json::Array(items) = value else {
            return None;
        };
        let (Json::String(tag), args) = items.split_first()? else {
            return None;
        };
        match (tag.as_str(), args) {
            ("load", [spec]) => LoadSpec::from_json(spec).ok().map(Self::Load),
            ("component" | "instance" | "start" | "proxy", [component, rest @ ..]) if rest.len() <= 1 => {
                let component = ComponentRef::from_json(component)?;
                let config = match rest.first() {
                    None | Some(Json::Null) => Config::new(),
                    Some(cfg @ Json::Object(_)) => self::config(cfg.clone()),
                    Some(_) => return None,
                };
                Some(match tag.as_str() {
                    "component" => Self::Component { component, config },
                    "instance" => Self::Instance { component, config },
                    "start" => Self::Start { component, config },
                    _ => Self::Proxy { component, config },
                })
            }
            ("store", [settings]) => StoreSettings::from_json(settings).ok().map(Self::Store),
            ("get", [settings, rest @ ..]) if rest.len() <= 1 => {
                let settings = StoreSettings::from_json(settings).ok()?;
                let query = Query::from_json(rest.first()).ok()?;
                Some(Self::Get { settings, query })
            }
            ("set", [settings, Json::Object(dataset)]) => Some(Self::Set {
                settings: StoreSettings::from_json(settings).ok()?,
                dataset: dataset.clone(),
            }),
            ("del", [settings, key]) => Some(Self::Del {
                settings: StoreSettings::from_json(settings).ok()?,
                key: DatasetKey::from_json(key)?,
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Component { .. } => "component",
            Self::Instance { .. } => "instance",
            Self::Start { .. } => "start",
            Self::Proxy { .. } => "proxy",
            Self::Store(_) => "store",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Del { .. } => "del",
        }
    }
}

/// A configuration value.
///
/// Besides plain JSON data, a value can be an unresolved [`Dependency`] or
/// one of the things dependencies resolve to. Only arrays and objects are
/// walked when looking for dependencies.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Dependency(Box<Dependency>),
    Resource(Resource),
    Component(ComponentHandle),
    Instance(Arc<Instance>),
    Lazy(LazyInstance),
    Store(Arc<Datastore>),
    /// An opaque value supplied by the host.
    Host(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Convert JSON, turning tagged arrays into dependencies.
    pub fn parse(json: &Json) -> Self {
        if let Some(dependency) = Dependency::parse(json) {
            return Self::Dependency(Box::new(dependency));
        }
        match json {
            Json::Array(items) => Self::Array(items.iter().map(Self::parse).collect()),
            Json::Object(map) => Self::Object(map.iter().map(|(k, v)| (k.clone(), Self::parse(v))).collect()),
            other => Self::plain(other.clone()),
        }
    }

    /// Convert JSON as data only. Tagged arrays stay arrays.
    pub fn plain(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::plain).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::plain(v))).collect()),
        }
    }

    pub fn host<T: Any + Send + Sync>(value: T) -> Self {
        Self::Host(Arc::new(value))
    }

    /// JSON view of the value. Resolved handles are summarised; unresolved
    /// dependencies and host values become `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null | Self::Dependency(_) | Self::Host(_) | Self::Lazy(_) => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => Json::Number(n.clone()),
            Self::String(s) => Json::String(s.clone()),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>()),
            Self::Resource(resource) => (**resource).clone(),
            Self::Component(handle) => serde_json::json!({ "component": handle.index() }),
            Self::Instance(instance) => serde_json::json!({ "instance": instance.index() }),
            Self::Store(store) => serde_json::json!({ "store": store.signature().as_str() }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_component(&self) -> Option<&ComponentHandle> {
        match self {
            Self::Component(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&LazyInstance> {
        match self {
            Self::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    pub fn as_store(&self) -> Option<&Arc<Datastore>> {
        match self {
            Self::Store(store) => Some(store),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn as_dependency(&self) -> Option<&Dependency> {
        match self {
            Self::Dependency(dependency) => Some(dependency),
            _ => None,
        }
    }

    /// Property of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Self::parse(&json)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Arc<Instance>> for Value {
    fn from(instance: Arc<Instance>) -> Self {
        Self::Instance(instance)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Object(map) => f.debug_map().entries(map).finish(),
            Self::Dependency(dep) => write!(f, "Dependency({})", dep.kind()),
            Self::Resource(resource) => write!(f, "Resource({resource})"),
            Self::Component(handle) => write!(f, "Component({})", handle.index()),
            Self::Instance(instance) => write!(f, "Instance({})", instance.index()),
            Self::Lazy(lazy) => write!(f, "Lazy({})", lazy.describe()),
            Self::Store(store) => write!(f, "Store({})", store.signature()),
            Self::Host(_) => write!(f, "Host"),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths into configuration trees
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Field(String),
    Index(usize),
}

pub(crate) fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            Segment::Field(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    out
}

/// Find every unresolved dependency under `value`. Resolved handles are
/// leaves and are never entered.
pub(crate) fn collect_dependencies(value: &Value, path: &mut Vec<Segment>, found: &mut Vec<(Vec<Segment>, Dependency)>) {
    match value {
        Value::Dependency(dependency) => found.push((path.clone(), (**dependency).clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                collect_dependencies(item, path, found);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (name, item) in map {
                path.push(Segment::Field(name.clone()));
                collect_dependencies(item, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

/// The slot at `path` in a config. The first segment must be a field.
pub(crate) fn slot_mut<'a>(config: &'a mut Config, path: &[Segment]) -> Option<&'a mut Value> {
    let (Segment::Field(first), rest) = path.split_first()? else {
        return None;
    };
    rest.iter().try_fold(config.get_mut(first)?, |value, segment| match (value, segment) {
        (Value::Object(map), Segment::Field(name)) => map.get_mut(name),
        (Value::Array(items), Segment::Index(i)) => items.get_mut(*i),
        _ => None,
    })
}

/// Apply a configuration layer. Later values win; keys containing dots
/// address nested objects, which are created as needed.
pub(crate) fn merge_layer(target: &mut Config, layer: Config) {
    for (key, value) in layer {
        if key.contains('.') {
            let parts: Vec<&str> = key.split('.').collect();
            set_dotted(target, &parts, value);
        } else {
            target.insert(key, value);
        }
    }
}

fn set_dotted(map: &mut Config, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let slot = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(IndexMap::new()));
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::Object(IndexMap::new());
            }
            if let Value::Object(inner) = slot {
                set_dotted(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_descriptors() {
        let value = Value::parse(&json!({
            "style": ["load", "style.css"],
            "child": ["instance", "chat", {"title": "x"}],
            "users": ["store", {"storeName": "users"}],
            "ada": ["get", {"storeName": "users"}, "ada"],
            "all": ["get", {"storeName": "users"}],
            "saved": ["set", {"storeName": "users"}, {"key": "bob"}],
            "gone": ["del", {"storeName": "users"}, "old"],
            "later": ["proxy", "chat"],
            "handle": ["component", "lib/chat.json"],
            "started": ["start", {"name": "inline"}]
        }));
        let kinds: Vec<_> = value
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_dependency().unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["load", "instance", "store", "get", "get", "set", "del", "proxy", "component", "start"]
        );
    }

    #[test]
    fn unknown_or_malformed_tags_are_data() {
        for json in [
            json!(["hello", 1]),
            json!(["load"]),
            json!(["instance", 5]),
            json!(["set", {"storeName": "s"}, "not an object"]),
            json!([1, 2, 3]),
        ] {
            assert!(matches!(Value::parse(&json), Value::Array(_)), "{json}");
        }
    }

    #[test]
    fn plain_keeps_tagged_arrays() {
        let value = Value::plain(json!({"ref": ["load", "x"]}));
        assert!(matches!(value.get("ref"), Some(Value::Array(_))));
        assert_eq!(value.to_json(), json!({"ref": ["load", "x"]}));
    }

    #[test]
    fn collect_and_splice() {
        let mut cfg = config(json!({
            "a": 1,
            "deep": {"list": [0, ["load", "x.json"]]}
        }));
        let mut found = Vec::new();
        for (name, value) in &cfg {
            collect_dependencies(value, &mut vec![Segment::Field(name.clone())], &mut found);
        }
        assert_eq!(found.len(), 1);
        assert_eq!(render_path(&found[0].0), "deep.list[1]");
        *slot_mut(&mut cfg, &found[0].0).unwrap() = Value::from("done");
        assert_eq!(cfg["deep"].to_json(), json!({"list": [0, "done"]}));
    }

    #[test]
    fn merge_with_dot_paths() {
        let mut target = config(json!({"a": 1, "nested": {"x": 1, "y": 2}}));
        merge_layer(&mut target, config(json!({"a": 2, "nested.x": 5, "fresh.deep": true})));
        assert_eq!(target["a"].to_json(), json!(2));
        assert_eq!(target["nested"].to_json(), json!({"x": 5, "y": 2}));
        assert_eq!(target["fresh"].to_json(), json!({"deep": true}));
    }
}
