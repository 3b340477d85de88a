use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};
use trellis_types::{Dataset, Query};

use crate::error::StoreResult;
use crate::registry::{Lookup, StoreRegistry};
use crate::settings::{Signature, StoreSettings};

/// A `["get", settings, key?]` reference embedded in a dataset.
#[derive(Clone, Debug)]
pub struct DataDependency {
    pub settings: StoreSettings,
    pub query: Query,
}

impl DataDependency {
    /// Recognise a data dependency. Anything else, including malformed
    /// `get` arrays, is plain data.
    pub fn parse(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        match items.as_slice() {
            [Value::String(tag), settings, rest @ ..] if tag == "get" && rest.len() <= 1 => {
                let settings = StoreSettings::from_json(settings).ok()?;
                let query = Query::from_json(rest.first()).ok()?;
                Some(Self { settings, query })
            }
            _ => None,
        }
    }

    pub fn signature(&self) -> Signature {
        self.settings.signature()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Identifies one dependency on the resolution path.
pub(crate) fn trail_entry(signature: &Signature, query: &Query) -> String {
    let query = query.to_json().map(|q| q.to_string()).unwrap_or_default();
    format!("{signature}#{query}")
}

fn collect(value: &Value, path: &mut Vec<Segment>, found: &mut Vec<(Vec<Segment>, DataDependency)>) {
    if let Some(dependency) = DataDependency::parse(value) {
        found.push((path.clone(), dependency));
        return;
    }
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                collect(item, path, found);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (name, item) in map {
                path.push(Segment::Field(name.clone()));
                collect(item, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

fn slot_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    path.iter().try_fold(root, |value, segment| match segment {
        Segment::Field(name) => value.as_object_mut()?.get_mut(name),
        Segment::Index(i) => value.as_array_mut()?.get_mut(*i),
    })
}

async fn resolve_one(
    registry: &StoreRegistry,
    dependency: &DataDependency,
    mut trail: Vec<String>,
    entry: String,
) -> StoreResult<Value> {
    let store = registry.store(&dependency.settings).await?;
    trail.push(entry);
    let fetched = store.fetch_traced(dependency.query.clone(), trail).await?;
    Ok(fetched.to_json())
}

/// Resolve every `get` dependency embedded in `dataset`.
///
/// Dependencies on stores that are open (or not yet requested) resolve
/// concurrently. Those on a store still being opened wait for it and are
/// spliced in after. A dependency already on `trail` is left as is.
pub(crate) async fn resolve_dataset(
    registry: &Arc<StoreRegistry>,
    dataset: Dataset,
    trail: Vec<String>,
) -> StoreResult<Dataset> {
    let mut root = Value::Object(dataset);
    let mut found = Vec::new();
    collect(&root, &mut Vec::new(), &mut found);
    if found.is_empty() {
        return Ok(into_dataset(root));
    }

    let mut ready = Vec::new();
    let mut deferred = Vec::new();
    for (path, dependency) in found {
        let signature = dependency.signature();
        let entry = trail_entry(&signature, &dependency.query);
        if trail.contains(&entry) {
            trace!(dependency = %entry, "reference cycle, leaving unresolved");
            continue;
        }
        match registry.lookup(&signature) {
            Lookup::Pending => deferred.push((path, dependency, entry)),
            Lookup::Absent | Lookup::Ready(_) => ready.push((path, dependency, entry)),
        }
    }

    for batch in [ready, deferred] {
        if batch.is_empty() {
            continue;
        }
        debug!(dependencies = batch.len(), "resolving data dependencies");
        let values = futures::future::try_join_all(batch.iter().map(|(_, dependency, entry)| {
            resolve_one(registry, dependency, trail.clone(), entry.clone())
        }))
        .await?;
        for ((path, _, _), value) in batch.iter().zip(values) {
            if let Some(slot) = slot_mut(&mut root, path) {
                *slot = value;
            }
        }
    }

    Ok(into_dataset(root))
}

fn into_dataset(value: Value) -> Dataset {
    match value {
        Value::Object(map) => map,
        _ => Dataset::new(),
    }
}
