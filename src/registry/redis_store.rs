//! Redis-backed connection registry
//!
//! Key layout under the configured prefix:
//! - `{prefix}:conn:{connection_id}`: JSON-encoded [`ConnectionRecord`]
//! - `{prefix}:user:{user_id}`: set of connection ids (secondary index)
//! - `{prefix}:activity`: sorted set of connection ids scored by last activity (ms)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use crate::config::RegistryConfig;
use crate::redis::{PoolError, RedisPool};

use super::traits::ConnectionRegistry;
use super::types::{ConnectionRecord, RegistryBackend, RegistryError, RegistryStats};

/// Attempts at a compare-and-swap update before giving up under contention
const SWAP_ATTEMPTS: usize = 8;

/// Replace a record only if it still holds the JSON it was read as, keeping the
/// activity index in step. A record removed concurrently is not resurrected.
///
/// KEYS[1] record key, KEYS[2] activity key.
/// ARGV[1] expected JSON, ARGV[2] new JSON, ARGV[3] connection id, ARGV[4] score.
const SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[3])
return 1
"#;

impl From<PoolError> for RegistryError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::CircuitOpen => RegistryError::Unavailable,
            PoolError::Redis(e) => RegistryError::Storage(e.to_string()),
        }
    }
}

pub struct RedisRegistry {
    pool: Arc<RedisPool>,
    prefix: String,
    swap_script: redis::Script,
}

impl RedisRegistry {
    pub fn new(pool: Arc<RedisPool>, config: &RegistryConfig) -> Self {
        Self {
            pool,
            prefix: config.key_prefix.clone(),
            swap_script: redis::Script::new(SWAP_SCRIPT),
        }
    }

    fn record_key(&self, connection_id: &str) -> String {
        format!("{}:conn:{}", self.prefix, connection_id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    fn activity_key(&self) -> String {
        format!("{}:activity", self.prefix)
    }

    fn encode(record: &ConnectionRecord) -> Result<String, RegistryError> {
        serde_json::to_string(record).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    fn decode(json: &str) -> Result<ConnectionRecord, RegistryError> {
        serde_json::from_str(json).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    /// Read-modify-write one record atomically.
    ///
    /// `apply` mutates the freshly read record and returns whether to write it
    /// back. If another writer changed the record in between, the swap is
    /// refused and `apply` runs again on the new value. Returns `None` when the
    /// record does not exist.
    async fn update_record<F>(
        &self,
        connection_id: &str,
        mut apply: F,
    ) -> Result<Option<bool>, RegistryError>
    where
        F: FnMut(&mut ConnectionRecord) -> Result<bool, RegistryError> + Send,
    {
        let key = self.record_key(connection_id);
        let activity_key = self.activity_key();

        for attempt in 1..=SWAP_ATTEMPTS {
            let read_key = key.clone();
            let current: Option<String> = self
                .pool
                .execute(|mut conn| async move { conn.get(&read_key).await })
                .await?;
            let Some(current) = current else {
                return Ok(None);
            };

            let mut record = Self::decode(&current)?;
            if !apply(&mut record)? {
                return Ok(Some(false));
            }

            let json = Self::encode(&record)?;
            let score = record.last_activity.timestamp_millis();
            let script = &self.swap_script;
            let (record_key, activity_key) = (&key, &activity_key);
            let swapped: i32 = self
                .pool
                .execute(|mut conn| async move {
                    let swapped: i32 = script
                        .key(record_key)
                        .key(activity_key)
                        .arg(&current)
                        .arg(&json)
                        .arg(connection_id)
                        .arg(score)
                        .invoke_async(&mut conn)
                        .await?;
                    Ok::<i32, redis::RedisError>(swapped)
                })
                .await?;

            if swapped == 1 {
                return Ok(Some(true));
            }
            tracing::debug!(
                connection_id = %connection_id,
                attempt = attempt,
                "Connection record changed during update, retrying"
            );
        }

        Err(RegistryError::Storage(format!(
            "Connection record {} kept changing during update",
            connection_id
        )))
    }

    /// Load records for a set of ids, skipping ids whose record has vanished
    async fn load_records(&self, ids: Vec<String>) -> Result<Vec<ConnectionRecord>, RegistryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let values: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move { conn.mget(&keys).await })
            .await?;

        let mut records = Vec::with_capacity(values.len());
        for json in values.into_iter().flatten() {
            match Self::decode(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable connection record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ConnectionRegistry for RedisRegistry {
    fn backend_type(&self) -> RegistryBackend {
        RegistryBackend::Redis
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        let previous_user = self
            .get(&record.connection_id)
            .await?
            .map(|prev| prev.user_id)
            .filter(|user| *user != record.user_id);

        let json = Self::encode(record)?;
        let key = self.record_key(&record.connection_id);
        let user_key = self.user_key(&record.user_id);
        let stale_user_key = previous_user.map(|user| self.user_key(&user));
        let activity_key = self.activity_key();
        let id = record.connection_id.clone();
        let score = record.last_activity.timestamp_millis();

        self.pool
            .execute(|mut conn| async move {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .set(&key, &json)
                    .ignore()
                    .sadd(&user_key, &id)
                    .ignore()
                    .zadd(&activity_key, &id, score)
                    .ignore();
                if let Some(stale) = stale_user_key {
                    pipe.srem(stale, &id).ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await?;

        tracing::debug!(
            connection_id = %record.connection_id,
            user_id = %record.user_id,
            "Connection record stored in Redis"
        );
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
        let key = self.record_key(connection_id);
        let json: Option<String> = self
            .pool
            .execute(|mut conn| async move { conn.get(&key).await })
            .await?;

        json.as_deref().map(Self::decode).transpose()
    }

    async fn touch(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), RegistryError> {
        let updated = self
            .update_record(connection_id, |record| {
                if !record.is_connected() {
                    return Err(RegistryError::Closed(record.connection_id.clone()));
                }
                record.apply_touch(at);
                Ok(true)
            })
            .await?;

        match updated {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(connection_id.to_string())),
        }
    }

    async fn remove(&self, connection_id: &str) -> Result<(), RegistryError> {
        let user_key = self
            .get(connection_id)
            .await?
            .map(|record| self.user_key(&record.user_id));

        let key = self.record_key(connection_id);
        let activity_key = self.activity_key();
        let id = connection_id.to_string();

        self.pool
            .execute(|mut conn| async move {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .del(&key)
                    .ignore()
                    .zrem(&activity_key, &id)
                    .ignore();
                if let Some(user_key) = user_key {
                    pipe.srem(user_key, &id).ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool, RegistryError> {
        let at = Utc::now();
        let flipped = self
            .update_record(connection_id, |record| Ok(record.close(at)))
            .await?;
        Ok(flipped.unwrap_or(false))
    }

    async fn close_if_idle(
        &self,
        connection_id: &str,
        older_than: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let flipped = self
            .update_record(connection_id, |record| Ok(record.close_if_idle(older_than, at)))
            .await?;
        Ok(flipped.unwrap_or(false))
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, RegistryError> {
        let user_key = self.user_key(user_id);
        let ids: Vec<String> = self
            .pool
            .execute(|mut conn| async move { conn.smembers(&user_key).await })
            .await?;

        Ok(self
            .load_records(ids)
            .await?
            .into_iter()
            .filter(|r| r.is_connected())
            .collect())
    }

    async fn scan_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConnectionRecord>, RegistryError> {
        // Scores are whole milliseconds; the exact comparison happens after loading
        let activity_key = self.activity_key();
        let max_score = older_than.timestamp_millis();
        let ids: Vec<String> = self
            .pool
            .execute(|mut conn| async move {
                conn.zrangebyscore(&activity_key, "-inf", max_score).await
            })
            .await?;

        Ok(self
            .load_records(ids)
            .await?
            .into_iter()
            .filter(|r| r.is_stale(older_than))
            .collect())
    }

    async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let activity_key = self.activity_key();
        let ids: Vec<String> = self
            .pool
            .execute(|mut conn| async move { conn.zrange(&activity_key, 0, -1).await })
            .await?;

        let records = self.load_records(ids).await?;
        let mut users = std::collections::HashSet::new();
        let mut stats = RegistryStats {
            total_records: records.len(),
            ..Default::default()
        };
        for record in &records {
            users.insert(record.user_id.as_str());
            if record.is_connected() {
                stats.connected += 1;
            } else {
                stats.disconnected += 1;
            }
        }
        stats.unique_users = users.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::redis::CircuitBreaker;

    fn registry() -> RedisRegistry {
        let pool = RedisPool::new(RedisConfig::default(), Arc::new(CircuitBreaker::new()))
            .expect("valid redis url");
        RedisRegistry::new(Arc::new(pool), &RegistryConfig::default())
    }

    #[test]
    fn test_key_layout() {
        let registry = registry();
        assert_eq!(registry.record_key("c1"), "ara:realtime:connections:conn:c1");
        assert_eq!(registry.user_key("u1"), "ara:realtime:connections:user:u1");
        assert_eq!(registry.activity_key(), "ara:realtime:connections:activity");
        assert_eq!(registry.backend_type(), RegistryBackend::Redis);
    }

    #[test]
    fn test_pool_errors_map_to_registry_errors() {
        assert!(matches!(
            RegistryError::from(PoolError::CircuitOpen),
            RegistryError::Unavailable
        ));
    }

    #[test]
    fn test_swap_script_guards_on_previous_value() {
        assert!(SWAP_SCRIPT.contains("redis.call('GET', KEYS[1]) ~= ARGV[1]"));
        assert_eq!(registry().swap_script.get_hash().len(), 40);
    }

    #[test]
    fn test_record_codec() {
        let record = ConnectionRecord::connected("c1", "u1");
        let json = RedisRegistry::encode(&record).unwrap();
        assert_eq!(RedisRegistry::decode(&json).unwrap(), record);
        assert!(RedisRegistry::decode("{not json").is_err());
    }
}
