//! Reference remote datastore for Trellis.
//!
//! Serves the remote tier wire contract over HTTP (`POST /v1/store`) and
//! over the realtime line protocol, where every successful write or delete
//! is pushed to the connections that addressed the same store.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod realtime;
pub mod router;
pub mod server;

pub use auth::{Action, AllowAllAuth, AuthProvider, Credentials, Identity, TokenAuth};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use hub::{Change, StoreHub, StoreId};
pub use server::TrellisServer;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tower::util::ServiceExt;
    use trellis_loader::{LoaderConfig, ResourceLoader, StaticFetcher};
    use trellis_store::{StoreBackends, StoreConfig, StoreRegistry, StoreSettings};
    use trellis_types::{Dataset, ReplayOrder};

    fn app() -> axum::Router {
        TrellisServer::new(ServerConfig::default()).router()
    }

    fn obj(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn post_store(app: axum::Router, body: Value) -> Value {
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/store")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn info_endpoint() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn store_endpoint_speaks_the_wire_contract() {
        let app = app();
        let written = post_store(app.clone(), json!({"dataset": {"key": "ada", "age": 36}, "storeName": "users"})).await;
        assert_eq!(written, json!({"key": "ada", "age": 36}));

        let read = post_store(app.clone(), json!({"key": "ada", "storeName": "users"})).await;
        assert_eq!(read, json!({"key": "ada", "age": 36}));

        let missing = post_store(app.clone(), json!({"key": "bob", "storeName": "users"})).await;
        assert_eq!(missing, Value::Null);

        let refused = post_store(app.clone(), json!({"dataset": {"key": "a b"}, "storeName": "users"})).await;
        assert!(refused.is_string());

        let deleted = post_store(app, json!({"del": "ada", "storeName": "users"})).await;
        assert_eq!(deleted["key"], json!("ada"));
    }

    #[tokio::test]
    async fn datastores_talk_to_a_running_server() {
        let server = TrellisServer::new(ServerConfig::default());
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let realtime = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_url = format!("http://{}", http.local_addr().unwrap());
        let realtime_url = format!("tcp://{}", realtime.local_addr().unwrap());
        tokio::spawn(server.serve_on(http, Some(realtime)));

        let loader = Arc::new(ResourceLoader::new(Arc::new(StaticFetcher::new()), LoaderConfig::default()));
        let registry = StoreRegistry::new(loader, StoreBackends::from_config(&StoreConfig::default()), ReplayOrder::Lifo);

        let remote = registry.store(&StoreSettings::remote(http_url, "notes")).await.unwrap();
        remote.set(obj(json!({"key": "n1", "text": "hi"}))).await.unwrap();

        let live = registry
            .store(&StoreSettings::remote(realtime_url, "notes").realtime())
            .await
            .unwrap();
        assert_eq!(live.get("n1").await.unwrap().unwrap()["text"], json!("hi"));

        // A write over HTTP reaches the realtime cache as a push.
        remote.set(obj(json!({"key": "n1", "text": "changed"}))).await.unwrap();
        let mut pushed = false;
        for _ in 0..100 {
            if live.cached("n1").is_some_and(|d| d["text"] == json!("changed")) {
                pushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pushed, "push notification never arrived");

        assert!(remote.del("n1").await.unwrap().is_some());
        assert!(remote.get("n1").await.unwrap().is_none());
    }
}
