use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{MetadataError, MetadataStore};
use crate::models::job::{Claim, Job, JobStatus};
use crate::models::photo::ProcessedPhoto;

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, Job>,
    photos: Vec<ProcessedPhoto>,
}

/// Metadata store held in process memory, with the same transition rules as
/// the Postgres store. A single lock covers both tables so `complete_job` is
/// atomic.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn photo_count(&self) -> usize {
        self.tables.lock().await.photos.len()
    }

    fn ensure_available(&self) -> Result<(), MetadataError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MetadataError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_job(
        &self,
        job_id: Uuid,
        source_key: &str,
        listing_id: Option<&str>,
    ) -> Result<Job, MetadataError> {
        self.ensure_available()?;
        let now = Utc::now();
        let job = Job {
            job_id,
            source_key: source_key.to_string(),
            listing_id: listing_id.map(str::to_string),
            status: JobStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().await.jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, MetadataError> {
        self.ensure_available()?;
        Ok(self.tables.lock().await.jobs.get(&job_id).cloned())
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Claim, MetadataError> {
        self.ensure_available()?;
        let mut tables = self.tables.lock().await;
        let Some(job) = tables.jobs.get_mut(&job_id) else {
            return Ok(Claim::Missing);
        };
        Ok(match job.status {
            JobStatus::Done => Claim::AlreadyDone,
            JobStatus::Failed => Claim::AlreadyFailed,
            JobStatus::Queued | JobStatus::Processing => {
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                Claim::Claimed(job.clone())
            }
        })
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        output_key: &str,
    ) -> Result<Option<ProcessedPhoto>, MetadataError> {
        self.ensure_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        match tables.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Done;
                job.error = None;
                job.updated_at = now;
            }
            _ => return Ok(None),
        }

        let photo = ProcessedPhoto {
            photo_id: Uuid::new_v4(),
            job_id,
            output_key: output_key.to_string(),
            display_order: 0,
            created_at: now,
        };
        tables.photos.push(photo.clone());
        Ok(Some(photo))
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, MetadataError> {
        self.ensure_available()?;
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn photos_for_job(&self, job_id: Uuid) -> Result<Vec<ProcessedPhoto>, MetadataError> {
        self.ensure_available()?;
        let tables = self.tables.lock().await;
        let mut photos: Vec<ProcessedPhoto> = tables
            .photos
            .iter()
            .filter(|p| p.job_id == job_id)
            .cloned()
            .collect();
        photos.sort_by_key(|p| (p.display_order, p.created_at));
        Ok(photos)
    }

    async fn health_check(&self) -> Result<(), MetadataError> {
        self.ensure_available()
    }
}
