//! GameDB consumers - one RabbitMQ consumer task per registered queue.
//!
//! Composition root: builds the config, registry, broker client and
//! collaborator instances, spawns the consumer fleet and waits for a
//! shutdown signal. Shutdown is abrupt by design: at-least-once delivery
//! tolerates a message being reprocessed after a crash.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gamedb::{
    build_registry, consumer, Config, LogSink, MemoryStore, Publisher, WebApiClient, WorkerContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("consumers_starting");

    let config = Arc::new(Config::from_env());
    info!(
        environment = %config.environment,
        rabbit_dsn_set = !config.rabbit_dsn.is_empty(),
        api_key_set = !config.steam_api_key.is_empty(),
        "config_loaded"
    );

    let registry = Arc::new(build_registry(&config));
    let publisher = Publisher::new(config.rabbit_dsn.clone());

    let steam = WebApiClient::new(
        config.steam_api_key.clone(),
        Duration::from_millis(config.api_timeout_ms),
    )?;

    let ctx = Arc::new(WorkerContext::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        publisher.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(steam),
        Arc::new(LogSink),
    ));

    for descriptor in registry.descriptors() {
        tokio::spawn(consumer::run(Arc::clone(&ctx), descriptor.clone()));
        info!(queue = %descriptor.consume_queue, "consumer_spawned");
    }

    info!("consumers_ready");

    shutdown_signal().await;

    info!("consumers_stopping");
    publisher.close().await;
    info!("consumers_shutdown_complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
