use anyhow::Result;
use common::telemetry::{init_telemetry, TelemetryConfig};
use common::AppConfig;
use futures_util::future::join_all;
use futures_util::stream::StreamExt;
use messaging::PartitionedConsumer;
use order_cache::{OrderCacheService, OrderIngestor};
use order_store::PostgresOrderStore;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod handlers;
mod routes;
mod state;

use state::AppState;

const KAFKA_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();

    let _telemetry = init_telemetry(TelemetryConfig::from_app(&config, "order-service"))
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    info!("Starting Order Service...");
    info!("Configuration:");
    info!("  HTTP port: {}", config.http_port);
    info!("  Kafka brokers: {}", config.kafka.bootstrap_servers());
    info!("  Kafka topic: {}", config.kafka.topic);
    info!("  Database pool size: {}", config.database.max_connections);

    // Durable store
    let store = Arc::new(
        PostgresOrderStore::connect(&config.database.url, config.database.max_connections)
            .await?,
    );
    store.migrate().await?;

    // Cache is fully restored before any consumer or request can reach it
    let orders = Arc::new(OrderCacheService::new(store.clone(), config.timeouts.restore).await);
    info!(cached = orders.cached_len().await, "Order cache ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ingestion: one loop per partition
    let mut consumer = PartitionedConsumer::new(
        &config.kafka.bootstrap_servers(),
        &config.kafka.group_id,
        &config.kafka.topic,
        KAFKA_METADATA_TIMEOUT,
    )?;
    let streams = consumer.take_partition_streams();
    let consumer = Arc::new(consumer);

    let ingestor = Arc::new(OrderIngestor::new(orders.clone(), config.timeouts.ingest));
    let partition_tasks = ingestor.spawn_partitions(streams, shutdown_rx.clone());
    info!(partitions = partition_tasks.len(), "Ingestion started");

    let main_queue_task = {
        let consumer = consumer.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = consumer.serve_main_queue() => {}
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        })
    };

    // Signal handling
    let signals = Signals::new([SIGTERM, SIGINT])?;
    let signals_handle = signals.handle();
    let signal_task = tokio::spawn(forward_shutdown_signal(signals, shutdown_tx.clone()));

    // HTTP query interface
    let app = routes::create_router(AppState::new(orders.clone(), config.timeouts.lookup));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Order service listening on {}", addr);

    let mut server = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
        })
    };

    let mut shutdown = shutdown_rx.clone();
    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown.wait_for(|stop| *stop) => {
            info!("Shutdown signal received, draining HTTP connections...");
            if tokio::time::timeout(config.timeouts.shutdown, &mut server).await.is_err() {
                warn!("HTTP server did not stop in time, aborting");
                server.abort();
            }
        }
    }

    // Stop the partition loops
    info!("Stopping ingestion...");
    match tokio::time::timeout(config.timeouts.shutdown, join_all(partition_tasks)).await {
        Ok(results) => {
            let handled: u64 = results.into_iter().filter_map(|r| r.ok()).sum();
            info!(handled, "Ingestion stopped");
        }
        Err(_) => warn!("Partition consumers did not stop in time"),
    }
    main_queue_task.abort();

    // Cleanup
    info!("Shutting down order service...");
    signals_handle.close();
    let _ = signal_task.await;
    store.pool().close().await;
    info!("Order service stopped");

    Ok(())
}

/// Flip the shutdown flag on the first SIGINT or SIGTERM
async fn forward_shutdown_signal(mut signals: Signals, shutdown: watch::Sender<bool>) {
    while let Some(signal) = signals.next().await {
        match signal {
            SIGTERM | SIGINT => {
                info!(signal, "Received shutdown signal");
                let _ = shutdown.send(true);
                break;
            }
            _ => {}
        }
    }
}
