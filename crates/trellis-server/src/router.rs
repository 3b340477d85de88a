use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use trellis_protocol::endpoints;

use crate::handler;
use crate::hub::StoreHub;

/// Build the axum router with all store endpoints.
pub fn build_router(hub: Arc<StoreHub>) -> Router {
    Router::new()
        .route(endpoints::STORE, post(handler::store_handler))
        .route(endpoints::HEALTH, get(handler::health_handler))
        .route(endpoints::INFO, get(handler::info_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub)
}
