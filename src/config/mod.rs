mod settings;

pub use settings::{
    GatewayConfig, ReclaimerConfig, RedisConfig, RegistryConfig, ServerConfig, Settings,
};
