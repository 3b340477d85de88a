use serde_json::Value;

use crate::dataset::{deep_get, Dataset};
use crate::error::TypeError;
use crate::key::DatasetKey;

/// What a `get` asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Every dataset.
    All,
    /// The single dataset with this key.
    Key(DatasetKey),
    /// Every dataset of which the filter is a structural subset.
    Match(Dataset),
}

impl Query {
    /// Interpret an optional JSON argument: absent/null means [`Query::All`],
    /// an object is a filter, anything else must be a key.
    pub fn from_json(value: Option<&Value>) -> Result<Self, TypeError> {
        match value {
            None | Some(Value::Null) => Ok(Self::All),
            Some(Value::Object(filter)) => Ok(Self::Match(filter.clone())),
            Some(other) => DatasetKey::from_json(other)
                .map(Self::Key)
                .ok_or_else(|| TypeError::InvalidQuery(other.to_string())),
        }
    }

    /// JSON form, as sent in the `key` field of a remote read request.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::All => None,
            Self::Key(key) => Some(key.to_json()),
            Self::Match(filter) => Some(Value::Object(filter.clone())),
        }
    }

    /// Query mode means scanning rather than a direct key lookup.
    pub fn is_query_mode(&self) -> bool {
        !matches!(self, Self::Key(_))
    }

    /// Returns `true` if `dataset` is selected by this query.
    pub fn matches(&self, dataset: &Dataset) -> bool {
        match self {
            Self::All => true,
            Self::Key(key) => {
                crate::dataset::dataset_key(dataset).is_some_and(|k| k.cache_key() == key.cache_key())
            }
            Self::Match(filter) => is_subset(filter, dataset),
        }
    }
}

impl From<DatasetKey> for Query {
    fn from(key: DatasetKey) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for Query {
    fn from(key: &str) -> Self {
        Self::Key(DatasetKey::from(key))
    }
}

/// Returns `true` if every property of `subset` is present in `superset`
/// with a deep-equal value. Property names may be dot paths.
pub fn is_subset(subset: &Dataset, superset: &Dataset) -> bool {
    subset.iter().all(|(name, expected)| {
        let found = superset.get(name).or_else(|| {
            if name.contains('.') {
                deep_get(superset, name)
            } else {
                None
            }
        });
        found == Some(expected)
    })
}
