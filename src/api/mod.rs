//! API layer - HTTP endpoint handlers.

mod connection;
mod health;
mod metrics;
mod routes;

pub use connection::{get_connection, get_user_connections, trigger_reclaim, UserConnectionsResponse};
pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
