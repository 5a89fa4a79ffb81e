//! Redis connectivity for the registry backend
//!
//! - `RedisPool`: shared multiplexed connection
//! - `CircuitBreaker`: rejects calls while the store is failing

mod circuit_breaker;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pool::{PoolError, RedisPool};
