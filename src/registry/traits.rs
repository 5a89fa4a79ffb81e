//! Connection registry trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{ConnectionRecord, RegistryBackend, RegistryError, RegistryStats};

/// Storage for connection records, keyed by connection id.
///
/// Every operation is scoped to a single connection id or user id, so callers
/// handling different connections never contend on a shared lock. All methods
/// are fallible: implementations talk to external storage.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> RegistryBackend;

    /// Upsert a full record. Idempotent.
    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError>;

    /// Point lookup by connection id
    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError>;

    /// Update `last_activity` only.
    ///
    /// Returns `NotFound` for a missing record and `Closed` for a DISCONNECTED
    /// one. Callers on the message path treat both as non-fatal.
    async fn touch(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), RegistryError>;

    /// Delete a record. Removing a missing id is not an error.
    async fn remove(&self, connection_id: &str) -> Result<(), RegistryError>;

    /// Flip a record to DISCONNECTED without deleting it.
    ///
    /// Returns `true` if the status changed; flipping an already DISCONNECTED
    /// or missing record is a no-op returning `false`.
    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool, RegistryError>;

    /// Flip a CONNECTED record to DISCONNECTED at `at`, but only if it is still
    /// idle since before `older_than` when the flip is applied.
    ///
    /// The check and the write are one atomic step, so activity recorded after
    /// a stale scan keeps the connection alive.
    async fn close_if_idle(
        &self,
        connection_id: &str,
        older_than: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError>;

    /// All CONNECTED records for a user
    async fn query_by_user(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, RegistryError>;

    /// All records (any status) with `last_activity < older_than`
    async fn scan_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConnectionRecord>, RegistryError>;

    /// Record counts by status
    async fn stats(&self) -> Result<RegistryStats, RegistryError>;
}
