use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Connection registry storage settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Backend type: "memory" or "redis"
    #[serde(default = "default_registry_backend")]
    pub backend: String,
    /// Key prefix for Redis-backed records
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// User id recorded when the transport supplies none
    #[serde(default = "default_anonymous_user_id")]
    pub anonymous_user_id: String,
    /// Consecutive touch failures before an operator-visible alert is raised
    #[serde(default = "default_touch_failure_alert_threshold")]
    pub touch_failure_alert_threshold: u32,
    /// Largest accepted inbound frame in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimerConfig {
    #[serde(default = "default_reclaimer_enabled")]
    pub enabled: bool,
    /// Sweep interval in seconds
    #[serde(default = "default_reclaim_interval")]
    pub interval_seconds: u64,
    /// Records idle longer than this are flipped to DISCONNECTED
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,
    /// DISCONNECTED records idle longer than this are removed (0 disables)
    #[serde(default = "default_purge_after")]
    pub purge_after_seconds: u64,
    /// Upper bound on status updates issued in parallel
    #[serde(default = "default_max_concurrent_updates")]
    pub max_concurrent_updates: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_registry_backend() -> String {
    "memory".to_string()
}

fn default_key_prefix() -> String {
    "ara:realtime:connections".to_string()
}

fn default_anonymous_user_id() -> String {
    "anonymous".to_string()
}

fn default_touch_failure_alert_threshold() -> u32 {
    10
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_reclaimer_enabled() -> bool {
    true
}

fn default_reclaim_interval() -> u64 {
    300 // 5 minutes
}

fn default_stale_threshold() -> u64 {
    3600 // 1 hour
}

fn default_purge_after() -> u64 {
    86_400 // 1 day
}

fn default_max_concurrent_updates() -> usize {
    100
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("redis.url", default_redis_url())?
            .set_default("registry.backend", default_registry_backend())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, REDIS__URL, REGISTRY__BACKEND, RECLAIMER__STALE_THRESHOLD_SECONDS, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            anonymous_user_id: default_anonymous_user_id(),
            touch_failure_alert_threshold: default_touch_failure_alert_threshold(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            enabled: default_reclaimer_enabled(),
            interval_seconds: default_reclaim_interval(),
            stale_threshold_seconds: default_stale_threshold(),
            purge_after_seconds: default_purge_after(),
            max_concurrent_updates: default_max_concurrent_updates(),
        }
    }
}
