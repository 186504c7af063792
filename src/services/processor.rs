//! Job consumer: claim, fetch, watermark, store, complete, acknowledge.
//!
//! Acknowledgement happens only after the job reaches a terminal state, so a
//! crash anywhere before that leads to redelivery and a safe re-run. Transient
//! failures are never acknowledged; permanent ones are recorded as `failed`
//! and acknowledged.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::MetadataStore;
use crate::error::ProcessingError;
use crate::models::job::Claim;
use crate::models::photo::ProcessedPhoto;
use crate::services::queue::{Delivery, JobQueue, QueueError, QueuedJob};
use crate::services::storage::ObjectStore;
use crate::services::watermark::{self, WatermarkOptions, OUTPUT_CONTENT_TYPE};

#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub watermark: WatermarkOptions,
    /// Remove the source upload once its job is terminal.
    pub delete_source: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDone,
    AlreadyFailed,
    UnknownJob,
    /// Another consumer finished the job between our claim and commit.
    LostRace,
}

/// What happened to one delivery.
#[derive(Debug)]
pub enum Outcome {
    Completed(ProcessedPhoto),
    Skipped(SkipReason),
    /// Permanent failure, recorded on the job and acknowledged.
    Failed(ProcessingError),
    /// Transient failure, left unacknowledged for redelivery.
    Retry(ProcessingError),
}

enum Step {
    Completed(ProcessedPhoto, String),
    Skipped(SkipReason),
}

pub fn output_key(job_id: Uuid) -> String {
    format!("processed/{job_id}.jpg")
}

#[derive(Clone)]
pub struct Processor {
    storage: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    metadata: Arc<dyn MetadataStore>,
    options: ProcessorOptions,
}

impl Processor {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        metadata: Arc<dyn MetadataStore>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            storage,
            queue,
            metadata,
            options,
        }
    }

    /// Receive and handle one message. `Ok(None)` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<Outcome>, QueueError> {
        match self.queue.receive().await? {
            Some(delivery) => Ok(Some(self.handle(delivery).await)),
            None => Ok(None),
        }
    }

    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let job_id = delivery.job.job_id;
        let started = Instant::now();
        tracing::info!(job_id = %job_id, source_key = %delivery.job.source_key, "Processing job");

        match self.run(&delivery.job).await {
            Ok(Step::Completed(photo, source_key)) => {
                self.acknowledge(&delivery).await;
                self.discard_source(job_id, &source_key).await;

                let elapsed = started.elapsed();
                metrics::counter!("pipeline_jobs_completed_total").increment(1);
                metrics::histogram!("pipeline_processing_seconds").record(elapsed.as_secs_f64());
                tracing::info!(
                    job_id = %job_id,
                    output_key = %photo.output_key,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                Outcome::Completed(photo)
            }
            Ok(Step::Skipped(reason)) => {
                tracing::info!(job_id = %job_id, reason = ?reason, "Skipping delivery");
                self.acknowledge(&delivery).await;
                Outcome::Skipped(reason)
            }
            Err(e) if e.is_retryable() => {
                metrics::counter!("pipeline_jobs_retried_total").increment(1);
                tracing::warn!(job_id = %job_id, error = %e, "Transient failure, leaving message for redelivery");
                Outcome::Retry(e)
            }
            Err(e) => self.fail_permanently(&delivery, e).await,
        }
    }

    async fn run(&self, message: &QueuedJob) -> Result<Step, ProcessingError> {
        let job = match self.metadata.claim_job(message.job_id).await? {
            Claim::Claimed(job) => job,
            Claim::AlreadyDone => return Ok(Step::Skipped(SkipReason::AlreadyDone)),
            Claim::AlreadyFailed => return Ok(Step::Skipped(SkipReason::AlreadyFailed)),
            Claim::Missing => {
                tracing::warn!(job_id = %message.job_id, "Message references unknown job");
                return Ok(Step::Skipped(SkipReason::UnknownJob));
            }
        };

        if job.source_key != message.source_key {
            tracing::warn!(
                job_id = %job.job_id,
                row_key = %job.source_key,
                message_key = %message.source_key,
                "Queue message key differs from job row, using job row"
            );
        }

        tracing::debug!(job_id = %job.job_id, "Downloading source object");
        let source = self.storage.get(&job.source_key).await?;

        tracing::debug!(job_id = %job.job_id, bytes = source.len(), "Applying watermark");
        let options = self.options.watermark.clone();
        let output = tokio::task::spawn_blocking(move || watermark::watermark(&source, &options))
            .await
            .map_err(|e| ProcessingError::Decode(format!("transform aborted: {e}")))?
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;

        let key = output_key(job.job_id);
        self.storage.put(&key, &output, OUTPUT_CONTENT_TYPE).await?;

        match self.metadata.complete_job(job.job_id, &key).await? {
            Some(photo) => Ok(Step::Completed(photo, job.source_key)),
            None => Ok(Step::Skipped(SkipReason::LostRace)),
        }
    }

    async fn fail_permanently(&self, delivery: &Delivery, error: ProcessingError) -> Outcome {
        let job_id = delivery.job.job_id;
        match self.metadata.fail_job(job_id, &error.to_string()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job_id = %job_id, error = %error, "Job already terminal, dropping failure");
                self.acknowledge(delivery).await;
                return Outcome::Skipped(SkipReason::LostRace);
            }
            Err(e) => {
                // Without the failed status persisted the message must come back.
                tracing::warn!(job_id = %job_id, error = %e, "Could not record failure, leaving message for redelivery");
                metrics::counter!("pipeline_jobs_retried_total").increment(1);
                return Outcome::Retry(ProcessingError::Metadata(e));
            }
        }

        self.acknowledge(delivery).await;
        self.discard_source(job_id, &delivery.job.source_key).await;
        metrics::counter!("pipeline_jobs_failed_total").increment(1);
        tracing::error!(job_id = %job_id, error = %error, "Job failed permanently");
        Outcome::Failed(error)
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        // A lost ack only causes a redelivery, which the claim step skips.
        if let Err(e) = self.queue.ack(delivery).await {
            tracing::warn!(job_id = %delivery.job.job_id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn discard_source(&self, job_id: Uuid, source_key: &str) {
        if !self.options.delete_source {
            return;
        }
        if let Err(e) = self.storage.delete(source_key).await {
            tracing::warn!(job_id = %job_id, source_key = %source_key, error = %e, "Failed to delete source object");
        }
    }
}

/// Register help text for the metrics emitted by consumers and the sweeper.
pub fn describe_metrics() {
    metrics::describe_counter!("pipeline_jobs_completed_total", "Jobs watermarked and marked done");
    metrics::describe_counter!("pipeline_jobs_failed_total", "Jobs marked failed permanently");
    metrics::describe_counter!(
        "pipeline_jobs_retried_total",
        "Deliveries left unacknowledged after a transient failure"
    );
    metrics::describe_histogram!(
        "pipeline_processing_seconds",
        metrics::Unit::Seconds,
        "Time from receive to acknowledgement of a completed job"
    );
    metrics::describe_gauge!("pipeline_queue_depth", "Messages waiting in the pending list");
}

/// Consumer loop: process messages until `shutdown` flips to true, sleeping
/// `poll_interval` whenever the queue is empty or unreachable.
pub async fn run_consumer(
    processor: Processor,
    worker_id: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker_id, "Consumer started");
    while !*shutdown.borrow() {
        let idle = match processor.process_next().await {
            Ok(Some(_)) => false,
            Ok(None) => {
                tracing::trace!(worker_id, "No jobs available, sleeping");
                true
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Failed to receive from queue");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    tracing::info!(worker_id, "Consumer stopped");
}

/// Periodically return expired in-flight messages to the queue and publish
/// the queue depth gauge.
pub async fn run_sweeper(
    queue: Arc<dyn JobQueue>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        match queue.requeue_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(requeued = n, "Requeued messages past their visibility timeout"),
            Err(e) => tracing::error!(error = %e, "Visibility sweep failed"),
        }
        if let Ok(depth) = queue.depth().await {
            metrics::gauge!("pipeline_queue_depth").set(depth as f64);
        }
    }
}
