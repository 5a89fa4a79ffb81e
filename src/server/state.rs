use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::gateway::{HandlerRegistry, TransportGateway};
use crate::redis::RedisPool;
use crate::registry::{create_registry, ConnectionRegistry};
use crate::tasks::StaleConnectionReclaimer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub gateway: Arc<TransportGateway>,
    pub reclaimer: Arc<StaleConnectionReclaimer>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Build state with the built-in message handlers
    pub fn new(settings: Settings, redis_pool: Option<Arc<RedisPool>>) -> Self {
        Self::with_handlers(settings, redis_pool, HandlerRegistry::with_defaults())
    }

    pub fn with_handlers(
        settings: Settings,
        redis_pool: Option<Arc<RedisPool>>,
        handlers: HandlerRegistry,
    ) -> Self {
        let registry = create_registry(&settings.registry, redis_pool.clone());
        let gateway = Arc::new(TransportGateway::new(
            settings.gateway.clone(),
            registry.clone(),
            Arc::new(handlers),
        ));
        let reclaimer = Arc::new(StaleConnectionReclaimer::new(
            settings.reclaimer.clone(),
            registry.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            gateway,
            reclaimer,
            redis_pool,
            start_time: Instant::now(),
        }
    }
}
