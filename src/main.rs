use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ara_realtime_service::config::Settings;
use ara_realtime_service::redis::{CircuitBreaker, RedisPool};
use ara_realtime_service::server::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!(
        registry_backend = %settings.registry.backend,
        "Configuration loaded"
    );

    let redis_pool = create_redis_pool(&settings).await;

    // Create application state
    let state = AppState::new(settings.clone(), redis_pool);
    tracing::info!(
        registry_backend = %state.registry.backend_type(),
        "Application state initialized"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start reclaimer loop in background
    let reclaimer_handle = if settings.reclaimer.enabled {
        let reclaimer = state.reclaimer.clone();
        Some(tokio::spawn(reclaimer.run(shutdown_tx.subscribe())))
    } else {
        tracing::info!("Reclaimer disabled");
        None
    };

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    if let Some(handle) = reclaimer_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Redis pool for the registry, when configured. Falls back to memory on failure.
async fn create_redis_pool(settings: &Settings) -> Option<Arc<RedisPool>> {
    if settings.registry.backend != "redis" {
        return None;
    }

    let pool = match RedisPool::new(settings.redis.clone(), Arc::new(CircuitBreaker::new())) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "Invalid Redis configuration");
            return None;
        }
    };

    match pool.ping().await {
        Ok(()) => tracing::info!(url = %settings.redis.url, "Connected to Redis"),
        // The pool reconnects lazily; keep it so the registry recovers
        Err(e) => tracing::warn!(error = %e, "Redis not reachable at startup"),
    }
    Some(pool)
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
