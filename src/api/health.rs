//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::redis::CircuitState;
use crate::registry::{RegistryBackend, RegistryStats};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub registry: RegistryHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub reclaimer: ReclaimerHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct RegistryHealthResponse {
    pub backend: RegistryBackend,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RegistryStats>,
    pub touch_failures: u32,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub circuit_breaker_state: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct ReclaimerHealthResponse {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub stale_threshold_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = match state.registry.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "Registry unavailable during health check");
            None
        }
    };
    let touch_failures = state.gateway.touch_monitor().consecutive_failures();

    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        circuit_breaker_state: pool.circuit_state(),
    });

    let healthy = stats.is_some() && touch_failures < state.settings.gateway.touch_failure_alert_threshold;
    let reclaimer = state.reclaimer.config();

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        registry: RegistryHealthResponse {
            backend: state.registry.backend_type(),
            available: stats.is_some(),
            stats,
            touch_failures,
        },
        redis,
        reclaimer: ReclaimerHealthResponse {
            enabled: reclaimer.enabled,
            interval_seconds: reclaimer.interval_seconds,
            stale_threshold_seconds: reclaimer.stale_threshold_seconds,
        },
    })
}
