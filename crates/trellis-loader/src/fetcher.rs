use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::spec::LoadSpec;

/// Performs the actual fetch of a resource.
///
/// The loader guarantees that `fetch` is never called concurrently for the
/// same cache key. Text resources are returned as `Value::String`, JSON
/// resources as their parsed value.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, spec: &LoadSpec) -> LoadResult<Value>;
}

/// HTTP(S) fetcher backed by `reqwest`.
///
/// Parameters become query parameters, credentials become basic auth.
/// A response is parsed as JSON if its content type says so or the URL ends
/// in `.json`; otherwise the body is returned as text.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, spec: &LoadSpec) -> LoadResult<Value> {
        let transport = |e: reqwest::Error| LoadError::Transport {
            url: spec.url.clone(),
            reason: e.to_string(),
        };

        let mut request = self.client.get(&spec.url).query(&spec.query_pairs());
        if let Some(username) = &spec.username {
            request = request.basic_auth(username, spec.password.as_ref());
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound(spec.url.clone()));
        }
        if !status.is_success() {
            return Err(LoadError::Transport {
                url: spec.url.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let is_json = spec.url.ends_with(".json")
            || response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("json"));
        let body = response.text().await.map_err(transport)?;
        debug!(url = %spec.url, bytes = body.len(), json = is_json, "fetched resource");

        if is_json {
            serde_json::from_str(&body).map_err(|e| LoadError::Decode {
                url: spec.url.clone(),
                reason: e.to_string(),
            })
        } else {
            Ok(Value::String(body))
        }
    }
}

/// Serves resources from an in-memory table keyed by URL.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    resources: RwLock<HashMap<String, Value>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the resource served at `url`.
    pub fn insert(&self, url: impl Into<String>, resource: Value) {
        self.resources
            .write()
            .expect("lock poisoned")
            .insert(url.into(), resource);
    }

    /// Serve `resource` at `url`.
    pub fn with(self, url: impl Into<String>, resource: Value) -> Self {
        self.insert(url, resource);
        self
    }

    pub fn len(&self) -> usize {
        self.resources.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, spec: &LoadSpec) -> LoadResult<Value> {
        self.resources
            .read()
            .expect("lock poisoned")
            .get(&spec.url)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(spec.url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_fetcher_serves_inserted() {
        let fetcher = StaticFetcher::new().with("a.json", json!({"a": 1}));
        assert_eq!(fetcher.len(), 1);
        let value = fetcher.fetch(&LoadSpec::new("a.json")).await.unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn static_fetcher_missing() {
        let fetcher = StaticFetcher::new();
        assert!(fetcher.is_empty());
        let err = fetcher.fetch(&LoadSpec::new("nope")).await.unwrap_err();
        assert_eq!(err, LoadError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn http_fetcher_reports_transport_errors() {
        let fetcher = HttpFetcher::new();
        let err = fetcher
            .fetch(&LoadSpec::new("http://127.0.0.1:1/unreachable.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Transport { .. }));
    }
}
