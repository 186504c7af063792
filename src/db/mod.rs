use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Claim, Job};
use crate::models::photo::ProcessedPhoto;

pub mod memory;
pub mod queries;

pub use memory::InMemoryMetadataStore;
pub use queries::PgMetadataStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Job and photo rows. Only the worker changes a job's status.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a job in `queued` state.
    async fn create_job(
        &self,
        job_id: Uuid,
        source_key: &str,
        listing_id: Option<&str>,
    ) -> Result<Job, MetadataError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, MetadataError>;

    /// Move a `queued` or `processing` job to `processing`. Terminal jobs are
    /// left untouched and reported as such.
    async fn claim_job(&self, job_id: Uuid) -> Result<Claim, MetadataError>;

    /// Move a `processing` job to `done` and record its photo in one step.
    /// Returns `None` without writing anything if the job is not `processing`.
    async fn complete_job(
        &self,
        job_id: Uuid,
        output_key: &str,
    ) -> Result<Option<ProcessedPhoto>, MetadataError>;

    /// Mark a non-terminal job `failed`. Returns false if it was already terminal.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, MetadataError>;

    async fn photos_for_job(&self, job_id: Uuid) -> Result<Vec<ProcessedPhoto>, MetadataError>;

    async fn health_check(&self) -> Result<(), MetadataError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
