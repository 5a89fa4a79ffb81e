//! Factory function for creating connection registries

use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::redis::RedisPool;

use super::memory::MemoryRegistry;
use super::redis_store::RedisRegistry;
use super::traits::ConnectionRegistry;

/// Create a connection registry based on configuration
pub fn create_registry(
    config: &RegistryConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn ConnectionRegistry> {
    match config.backend.as_str() {
        "redis" => match redis_pool {
            Some(pool) => {
                tracing::info!(key_prefix = %config.key_prefix, "Using Redis connection registry");
                Arc::new(RedisRegistry::new(pool, config))
            }
            None => {
                tracing::warn!(
                    "Redis registry requested but Redis pool not available, falling back to memory"
                );
                Arc::new(MemoryRegistry::new())
            }
        },
        "memory" => {
            tracing::info!("Using in-memory connection registry");
            Arc::new(MemoryRegistry::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown registry backend, falling back to memory");
            Arc::new(MemoryRegistry::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBackend;

    #[test]
    fn test_create_memory_registry() {
        let registry = create_registry(&RegistryConfig::default(), None);
        assert_eq!(registry.backend_type(), RegistryBackend::Memory);
    }

    #[test]
    fn test_redis_without_pool_falls_back() {
        let config = RegistryConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let registry = create_registry(&config, None);
        assert_eq!(registry.backend_type(), RegistryBackend::Memory);
    }
}
