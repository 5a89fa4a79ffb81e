//! Connection record types and registry errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a connection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    /// Logically deleted: read-only and eligible for removal
    Disconnected,
}

/// Persisted state describing one live transport session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub user_id: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// When the record was flipped to DISCONNECTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    /// Create a CONNECTED record whose activity starts at creation time
    pub fn connected(connection_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::connected_at(connection_id, user_id, Utc::now())
    }

    pub fn connected_at(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            status: ConnectionStatus::Connected,
            created_at: at,
            last_activity: at,
            disconnected_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Apply an activity timestamp, never moving `last_activity` before `created_at`
    pub fn apply_touch(&mut self, at: DateTime<Utc>) {
        self.last_activity = at.max(self.created_at);
    }

    /// Whether the record has been idle since before `older_than`
    pub fn is_stale(&self, older_than: DateTime<Utc>) -> bool {
        self.last_activity < older_than
    }

    /// Flip to DISCONNECTED at `at`. Returns false if already closed.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.status = ConnectionStatus::Disconnected;
        self.disconnected_at = Some(at.max(self.last_activity));
        true
    }

    /// Flip to DISCONNECTED only while still idle since before `older_than`
    pub fn close_if_idle(&mut self, older_than: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        self.is_stale(older_than) && self.close(at)
    }

    /// Closed, with the flip (or last activity when no flip time is stored) before `cutoff`
    pub fn closed_before(&self, cutoff: DateTime<Utc>) -> bool {
        !self.is_connected() && self.disconnected_at.unwrap_or(self.last_activity) < cutoff
    }
}

/// Backend type for the connection registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Memory,
    Redis,
}

impl std::fmt::Display for RegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Record counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_records: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub unique_users: usize,
}

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection record not found: {0}")]
    NotFound(String),

    #[error("Connection record is closed: {0}")]
    Closed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Registry store unavailable")]
    Unavailable,
}
