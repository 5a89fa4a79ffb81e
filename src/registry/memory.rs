//! In-process connection registry backed by DashMap

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::traits::ConnectionRegistry;
use super::types::{ConnectionRecord, RegistryBackend, RegistryError, RegistryStats};

/// Connection registry held in process memory.
///
/// Suitable for single-instance deployments and tests. Records do not survive
/// a restart.
pub struct MemoryRegistry {
    /// connection_id -> record
    records: DashMap<String, ConnectionRecord>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    fn index_user(&self, user_id: &str, connection_id: &str) {
        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    fn unindex_user(&self, user_id: &str, connection_id: &str) {
        if let Some(mut conns) = self.user_index.get_mut(user_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                drop(conns);
                self.user_index.remove_if(user_id, |_, c| c.is_empty());
            }
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    fn backend_type(&self) -> RegistryBackend {
        RegistryBackend::Memory
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        let previous = self
            .records
            .insert(record.connection_id.clone(), record.clone());

        // Re-keying a connection to another user drops the stale index entry
        if let Some(prev) = previous {
            if prev.user_id != record.user_id {
                self.unindex_user(&prev.user_id, &prev.connection_id);
            }
        }
        self.index_user(&record.user_id, &record.connection_id);

        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
        Ok(self.records.get(connection_id).map(|r| r.value().clone()))
    }

    async fn touch(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut record = self
            .records
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::NotFound(connection_id.to_string()))?;

        if !record.is_connected() {
            return Err(RegistryError::Closed(connection_id.to_string()));
        }

        record.apply_touch(at);
        Ok(())
    }

    async fn remove(&self, connection_id: &str) -> Result<(), RegistryError> {
        if let Some((_, record)) = self.records.remove(connection_id) {
            self.unindex_user(&record.user_id, connection_id);
        }
        Ok(())
    }

    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool, RegistryError> {
        Ok(self
            .records
            .get_mut(connection_id)
            .is_some_and(|mut record| record.close(Utc::now())))
    }

    async fn close_if_idle(
        &self,
        connection_id: &str,
        older_than: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .records
            .get_mut(connection_id)
            .is_some_and(|mut record| record.close_if_idle(older_than, at)))
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, RegistryError> {
        let ids: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .filter(|r| r.is_connected())
            .collect())
    }

    async fn scan_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConnectionRecord>, RegistryError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_stale(older_than))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let mut stats = RegistryStats {
            total_records: self.records.len(),
            unique_users: self.user_index.len(),
            ..Default::default()
        };
        for entry in self.records.iter() {
            if entry.value().is_connected() {
                stats.connected += 1;
            } else {
                stats.disconnected += 1;
            }
        }
        Ok(stats)
    }
}
