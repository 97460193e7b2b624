// Entry point for the courier broker HTTP server

mod config;
mod error;
mod routes;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use courier::persistence::PostgresJobStore;
use courier::{BrokerBuilder, QueueAdapter, QueueBackendConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courier=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting courier broker");

    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(engine = config.backend.engine(), "Configuration loaded");

    #[cfg(feature = "metrics")]
    courier::metrics::init_metrics().context("Failed to register metrics")?;

    tracing::info!("Connecting to database...");
    let store = PostgresJobStore::connect(&config.persistence)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Running database migrations...");
    store.migrate().await.context("Failed to run migrations")?;

    let queue = build_queue(&config.backend).await?;

    let broker = Arc::new(
        BrokerBuilder::new(config.broker.clone())
            .with_store(Arc::new(store))
            .with_queue(queue)
            .build()?,
    );
    broker.spawn_reconciler().await;

    let app = routes::router(broker.clone());

    let addr = config.bind_addr();
    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    broker.shutdown().await?;
    Ok(())
}

async fn build_queue(config: &QueueBackendConfig) -> Result<Arc<dyn QueueAdapter>> {
    match config {
        #[cfg(feature = "redis")]
        QueueBackendConfig::Redis { url, .. } => {
            let backend = courier::queue::redis_list::RedisListBackend::new(url)
                .context("Invalid Redis URL")?;
            Ok(Arc::new(courier::ListQueue::new(backend, config.pop_wait())))
        }
        #[cfg(feature = "sqs")]
        QueueBackendConfig::Sqs { region, .. } => {
            let backend = courier::queue::sqs::SqsBackend::from_env(region.clone()).await;
            Ok(Arc::new(courier::DelayQueue::new(backend, config.pop_wait())))
        }
        #[allow(unreachable_patterns)]
        other => bail!("{} support is not compiled in", other.engine()),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
