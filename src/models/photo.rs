use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processed output artifact. Exactly one per `done` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPhoto {
    pub photo_id: Uuid,
    pub job_id: Uuid,
    pub output_key: String,
    /// Owned by the external reordering operation; the pipeline writes 0.
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}
