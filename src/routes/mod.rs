use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod status;
pub mod upload;

/// Build the HTTP API. `/upload` sits behind the rate limiter; `/metrics` is
/// mounted only when a Prometheus handle is supplied.
pub fn router(
    state: AppState,
    prometheus: Option<Arc<PrometheusHandle>>,
    max_upload_bytes: usize,
) -> Router {
    let upload_route = post(upload::upload_photo).layer(middleware::from_fn_with_state(
        state.rate_limiter.clone(),
        rate_limit::enforce_rate_limit,
    ));

    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", upload_route)
        .route("/job-status", get(status::get_job_status))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(self::metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
