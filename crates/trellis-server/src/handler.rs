use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::json;
use trellis_protocol::{HealthResponse, StoreRequest};

use crate::hub::StoreHub;

/// Store request handler. The body is the response JSON, including the
/// string error sentinel.
pub async fn store_handler(State(hub): State<Arc<StoreHub>>, Json(request): Json<StoreRequest>) -> Json<serde_json::Value> {
    Json(hub.handle(request).await.to_json())
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Info handler.
pub async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "trellis-server",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": trellis_protocol::PROTOCOL_VERSION,
    }))
}
