use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// Number of random digits appended to the timestamp by [`generate_key`].
const RANDOM_SUFFIX_DIGITS: u32 = 16;

/// Key of a dataset.
///
/// Keys are strings or integers. An array of keys forms a composite key,
/// in which case every element must itself be valid.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetKey {
    Number(i64),
    Text(String),
    Composite(Vec<DatasetKey>),
}

impl DatasetKey {
    /// Read a key from a JSON value. Returns `None` for values that cannot
    /// be keys at all (objects, booleans, null, floats).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::Composite),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
            Self::Composite(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Check the key against the allowed key format.
    pub fn validate(&self) -> Result<(), TypeError> {
        match self {
            Self::Number(_) => Ok(()),
            Self::Text(s) if is_valid_key_text(s) => Ok(()),
            Self::Text(s) => Err(TypeError::InvalidKey(s.clone())),
            Self::Composite(items) if items.is_empty() => {
                Err(TypeError::InvalidKey("empty composite key".into()))
            }
            Self::Composite(items) => items.iter().try_for_each(Self::validate),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Canonical string form used to index caches and backing stores.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::Composite(_) => self.to_json().to_string(),
        }
    }
}

impl fmt::Debug for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetKey({})", self.cache_key())
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

impl From<&str> for DatasetKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for DatasetKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for DatasetKey {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Returns `true` if `s` is a non-empty run of ASCII letters, digits, `_`
/// or `-`.
pub fn is_valid_key_text(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Generate a fresh dataset key.
///
/// The key is the current wall-clock time in milliseconds followed by a
/// fixed-width random suffix, so keys sort by creation time and collide
/// only with negligible probability.
pub fn generate_key() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: u64 = rand::thread_rng().gen_range(0..10u64.pow(RANDOM_SUFFIX_DIGITS));
    format!("{millis}{suffix:016}")
}
