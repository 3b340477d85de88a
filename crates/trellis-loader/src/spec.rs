use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LoadError, LoadResult};

/// What to load: a URL plus optional request parameters and credentials.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSpec {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// Bypass (and refresh) the resource cache.
    #[serde(default)]
    pub ignore_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl LoadSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn ignoring_cache(mut self) -> Self {
        self.ignore_cache = true;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parse a spec from a bare URL string or a spec object.
    pub fn from_json(value: &Value) -> LoadResult<Self> {
        match value {
            Value::String(url) => Ok(Self::new(url.clone())),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| LoadError::InvalidSpec(e.to_string())),
            other => Err(LoadError::InvalidSpec(other.to_string())),
        }
    }

    /// Parameters rendered as `(name, value)` string pairs, sorted by name.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .flatten()
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect();
        pairs.sort();
        pairs
    }

    /// Identity of the resource in the cache and the in-flight waitlist:
    /// the URL plus its canonically ordered parameters.
    pub fn cache_key(&self) -> String {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}{}", self.url, query.join("&"))
    }
}

impl From<&str> for LoadSpec {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for LoadSpec {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_bare_url() {
        let spec = LoadSpec::from_json(&json!("style.css")).unwrap();
        assert_eq!(spec.url, "style.css");
        assert!(!spec.ignore_cache);
    }

    #[test]
    fn from_object() {
        let spec = LoadSpec::from_json(&json!({
            "url": "data.json",
            "params": {"lang": "de", "page": 2},
            "ignoreCache": true,
            "username": "ada",
            "password": "secret"
        }))
        .unwrap();
        assert!(spec.ignore_cache);
        assert_eq!(spec.username.as_deref(), Some("ada"));
        assert_eq!(
            spec.query_pairs(),
            vec![("lang".into(), "de".into()), ("page".into(), "2".into())]
        );
    }

    #[test]
    fn from_invalid() {
        assert!(matches!(
            LoadSpec::from_json(&json!(42)),
            Err(LoadError::InvalidSpec(_))
        ));
        assert!(LoadSpec::from_json(&json!({"params": {}})).is_err());
    }

    #[test]
    fn cache_key_is_canonical() {
        let mut a = Map::new();
        a.insert("b".into(), json!(1));
        a.insert("a".into(), json!("x"));
        let mut b = Map::new();
        b.insert("a".into(), json!("x"));
        b.insert("b".into(), json!(1));
        let ka = LoadSpec::new("u").with_params(a).cache_key();
        let kb = LoadSpec::new("u").with_params(b).cache_key();
        assert_eq!(ka, kb);
        assert_eq!(ka, "u?a=x&b=1");
        assert_eq!(LoadSpec::new("u").cache_key(), "u");
    }
}
