pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod sandbox;
pub mod store;
pub mod worker;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;

use crate::{
    config::EngineConfig, dispatch::Dispatcher, metrics::MetricsRegistry, store::JobStore,
};

pub async fn run() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    init_tracing(&config);

    let store = JobStore::new();
    store.spawn_retention_sweep(Duration::from_secs(config.result_ttl_secs));
    let metrics = Arc::new(MetricsRegistry::new());
    let queue = queue::backend_from_config(&config)
        .await
        .context("queue backend init failed")?;

    worker::spawn_worker_pools(&config, queue.clone(), store.clone(), metrics.clone());

    let dispatcher = Arc::new(Dispatcher::new(queue, store, metrics.clone()));
    let app: Router = dispatch::routes(dispatcher, metrics);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let local = listener
        .local_addr()
        .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
    tracing::info!(bind = %local, "code execution engine ready");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .init();
}
