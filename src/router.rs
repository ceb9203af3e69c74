//! Wires the external HTTP routes onto their handlers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;

pub fn build_router() -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/reduce", post(handlers::reduce))
        .route("/create-matrix", post(handlers::create_matrix))
        .layer(TraceLayer::new_for_http())
}
