//! Route table.

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/devices", post(handlers::create_device))
        .route("/api/devices/{id}/test", post(handlers::test_device))
        .route("/api/devices/{id}/status", get(handlers::device_status))
        .route("/api/devices/{id}/outputs/{ch}", post(handlers::set_output))
        .route(
            "/api/devices/{id}/failsafe/{ch}",
            post(handlers::set_fail_safe),
        )
        .route(
            "/api/devices/{id}/channels/{kind}/{ch}/label",
            put(handlers::set_label),
        )
        .route("/api/connections/stats", get(handlers::connection_stats))
        .route("/api/observers", post(handlers::register_observer))
        .route("/api/observers/{id}", delete(handlers::remove_observer))
        .route(
            "/api/observers/{id}/subscriptions",
            post(handlers::add_subscription).delete(handlers::remove_subscription),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
