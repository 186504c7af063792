use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{MetadataError, MetadataStore};
use crate::models::job::{Claim, Job, JobStatus};
use crate::models::photo::ProcessedPhoto;

const JOB_COLUMNS: &str =
    "job_id, source_key, listing_id, status, error, created_at, updated_at";
const PHOTO_COLUMNS: &str = "photo_id, job_id, output_key, display_order, created_at";

/// Postgres-backed `jobs` / `photos` tables.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, MetadataError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| MetadataError::Corrupt(format!("unknown job status {status_str:?}")))?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        source_key: row.try_get("source_key")?,
        listing_id: row.try_get("listing_id")?,
        status,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn photo_from_row(row: &PgRow) -> Result<ProcessedPhoto, MetadataError> {
    Ok(ProcessedPhoto {
        photo_id: row.try_get("photo_id")?,
        job_id: row.try_get("job_id")?,
        output_key: row.try_get("output_key")?,
        display_order: row.try_get("display_order")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create_job(
        &self,
        job_id: Uuid,
        source_key: &str,
        listing_id: Option<&str>,
    ) -> Result<Job, MetadataError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (job_id, source_key, listing_id, status)
            VALUES ($1, $2, $3, 'queued')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(source_key)
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, MetadataError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Claim, MetadataError> {
        let claimed = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = NOW()
            WHERE job_id = $1 AND status IN ('queued', 'processing')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(Claim::Claimed(job_from_row(&row)?));
        }

        Ok(match self.get_job(job_id).await? {
            None => Claim::Missing,
            Some(job) if job.status == JobStatus::Done => Claim::AlreadyDone,
            Some(_) => Claim::AlreadyFailed,
        })
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        output_key: &str,
    ) -> Result<Option<ProcessedPhoto>, MetadataError> {
        let mut tx = self.pool.begin().await?;

        // The status predicate makes the losing side of a race a no-op.
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done', error = NULL, updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO photos (photo_id, job_id, output_key, display_order)
            VALUES ($1, $2, $3, 0)
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(output_key)
        .fetch_one(&mut *tx)
        .await?;

        let photo = photo_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(photo))
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2, updated_at = NOW()
            WHERE job_id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn photos_for_job(&self, job_id: Uuid) -> Result<Vec<ProcessedPhoto>, MetadataError> {
        let rows = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE job_id = $1 ORDER BY display_order, created_at"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(photo_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), MetadataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
