use media_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgMetadataStore},
    routes,
    services::{queue::RedisJobQueue, rate_limiter::RateLimiter, storage::R2Client},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
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

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media pipeline API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("pipeline_uploads_total", "Uploads accepted and queued");
    metrics::describe_counter!(
        "pipeline_rate_limited_total",
        "Upload requests rejected by the rate limiter"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object store client");
    let storage = R2Client::new(
        &config.storage_bucket,
        &config.storage_region,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    )
    .expect("Failed to initialize object store client");

    tracing::info!("Connecting to Redis job queue");
    let queue = RedisJobQueue::new(
        &config.redis_url,
        &config.queue_name,
        config.visibility_timeout(),
    )
    .expect("Failed to initialize job queue");

    let limiter = RateLimiter::new(config.rate_limit());
    let state = AppState::new(
        Arc::new(storage),
        Arc::new(queue),
        Arc::new(PgMetadataStore::new(db_pool)),
        limiter,
    );

    // Elapsed windows would otherwise accumulate one entry per client forever.
    let cleanup_limiter = state.rate_limiter.clone();
    let cleanup_every = config.rate_limit().window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_every);
        loop {
            ticker.tick().await;
            let removed = cleanup_limiter.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "Dropped expired rate limit windows");
            }
        }
    });

    let app = routes::router(state, Some(prometheus_handle), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
