use serde_json::{Map, Value};

use crate::key::DatasetKey;

/// A dataset: a JSON object identified by its `key` field.
pub type Dataset = Map<String, Value>;

/// Read the `key` field of a dataset, if it holds a key-shaped value.
pub fn dataset_key(dataset: &Dataset) -> Option<DatasetKey> {
    dataset.get("key").and_then(DatasetKey::from_json)
}

/// Look up a dot-separated path (`"a.b.c"`) inside a JSON object.
pub fn deep_get<'a>(map: &'a Dataset, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at a dot-separated path, creating intermediate objects
/// and replacing non-object intermediates.
pub fn deep_set(map: &mut Dataset, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                deep_set(inner, rest, value);
            }
        }
    }
}

/// Integrate `priority` into `target`.
///
/// Every top-level property of `priority` replaces the property of the
/// same name in `target`. Property names containing dots address nested
/// fields, so `{"a.b": 1}` only touches `target.a.b`.
pub fn integrate(priority: &Dataset, target: &mut Dataset) {
    for (name, value) in priority {
        deep_set(target, name, value.clone());
    }
}
