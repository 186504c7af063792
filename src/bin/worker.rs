use media_pipeline::{
    config::AppConfig,
    db::{self, PgMetadataStore},
    services::{
        processor::{self, Processor},
        queue::{JobQueue, RedisJobQueue},
        storage::R2Client,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting media processing worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr = config
        .worker_metrics_addr()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");
    processor::describe_metrics();
    tracing::info!(%metrics_addr, "Serving worker metrics");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = R2Client::new(
        &config.storage_bucket,
        &config.storage_region,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    )
    .expect("Failed to initialize object store client");

    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::new(
            &config.redis_url,
            &config.queue_name,
            config.visibility_timeout(),
        )
        .expect("Failed to initialize job queue"),
    );

    let processor = Processor::new(
        Arc::new(storage),
        queue.clone(),
        Arc::new(PgMetadataStore::new(db_pool)),
        config.processor_options(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let concurrency = config.worker_concurrency.max(1);

    tracing::info!(
        concurrency,
        visibility_timeout_secs = config.visibility_timeout_secs,
        "Worker ready, starting job processing loops"
    );

    let mut tasks = Vec::with_capacity(concurrency + 1);
    for worker_id in 0..concurrency {
        tasks.push(tokio::spawn(processor::run_consumer(
            processor.clone(),
            worker_id,
            config.poll_interval(),
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(processor::run_sweeper(
        queue,
        config.sweep_interval(),
        shutdown_rx,
    )));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, finishing in-flight jobs");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    tracing::info!("Worker stopped");
}
