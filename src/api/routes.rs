use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::connection::{get_connection, get_user_connections, trigger_reclaim};
use super::health::health;
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Registry queries
                .route("/users/{user_id}/connections", get(get_user_connections))
                .route("/connections/{connection_id}", get(get_connection))
                // Reclaimer
                .route("/reclaim", post(trigger_reclaim)),
        )
}
