//! Connection registry and reclaimer endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::registry::{ConnectionRecord, RegistryError};
use crate::server::AppState;
use crate::tasks::SweepReport;

#[derive(Debug, Serialize)]
pub struct UserConnectionsResponse {
    pub user_id: String,
    pub connections: Vec<ConnectionRecord>,
    pub total: usize,
}

/// GET /api/v1/users/{user_id}/connections - CONNECTED records for a user
pub async fn get_user_connections(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserConnectionsResponse>> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id must not be empty".to_string()));
    }

    let connections = state.registry.query_by_user(&user_id).await?;
    Ok(Json(UserConnectionsResponse {
        user_id,
        total: connections.len(),
        connections,
    }))
}

/// GET /api/v1/connections/{connection_id} - Single record lookup
pub async fn get_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<ConnectionRecord>> {
    state
        .registry
        .get(&connection_id)
        .await?
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(connection_id).into())
}

/// POST /api/v1/reclaim - Run one reclamation sweep now
pub async fn trigger_reclaim(State(state): State<AppState>) -> Result<Json<SweepReport>> {
    tracing::info!("On-demand reclamation sweep requested");
    let report = state.reclaimer.sweep().await?;
    Ok(Json(report))
}
