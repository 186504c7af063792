use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use crate::services::processor::ProcessorOptions;
use crate::services::rate_limiter::RateLimitConfig;
use crate::services::watermark::WatermarkOptions;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape listener for the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string for the jobs/photos tables
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Prefix for the queue's Redis keys
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Bucket name on the S3-compatible object store
    pub storage_bucket: String,

    /// Object store endpoint URL
    pub storage_endpoint: String,

    #[serde(default = "default_storage_region")]
    pub storage_region: String,

    pub storage_access_key: String,

    pub storage_secret_key: String,

    /// Uploads admitted per client per window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Must exceed the worst-case processing time of one job
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Number of concurrent consumer loops in the worker
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Sleep between polls of an empty queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often expired in-flight messages are returned to the queue
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_watermark_text")]
    pub watermark_text: String,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub delete_source_after_processing: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_queue_name() -> String {
    "media_pipeline".to_string()
}

fn default_storage_region() -> String {
    "auto".to_string()
}

fn default_rate_limit_requests() -> u32 {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    15
}

fn default_watermark_text() -> String {
    "Listing Media".to_string()
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.rate_limit_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn worker_metrics_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.worker_metrics_addr.parse()
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            watermark: WatermarkOptions {
                label: self.watermark_text.clone(),
                jpeg_quality: self.jpeg_quality,
            },
            delete_source: self.delete_source_after_processing,
        }
    }
}
