//! Connection registry
//!
//! Persisted connection records keyed by connection id, with a secondary
//! index by user and a scan by last activity. Backends:
//! - `MemoryRegistry`: DashMap-backed, single instance
//! - `RedisRegistry`: shared across instances

mod factory;
mod memory;
mod redis_store;
mod touch_monitor;
mod traits;
mod types;

pub use factory::create_registry;
pub use memory::MemoryRegistry;
pub use redis_store::RedisRegistry;
pub use touch_monitor::TouchFailureMonitor;
pub use traits::ConnectionRegistry;
pub use types::{
    ConnectionRecord, ConnectionStatus, RegistryBackend, RegistryError, RegistryStats,
};
