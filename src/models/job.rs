use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle of a processing job.
///
/// `Done` and `Failed` are terminal. Only the worker moves a job out of
/// `Queued`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// A unit of asynchronous work tracked in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub source_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of trying to take ownership of a job before processing it.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The job is now `processing` and belongs to the caller.
    Claimed(Job),
    AlreadyDone,
    AlreadyFailed,
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_ref()).unwrap(), status);
        }
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn job_serializes_with_camel_case_fields() {
        let now = Utc::now();
        let job = Job {
            job_id: Uuid::nil(),
            source_key: "uploads/a.jpg".to_string(),
            listing_id: None,
            status: JobStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["sourceKey"], "uploads/a.jpg");
        assert_eq!(value["status"], "queued");
        assert!(value.get("listingId").is_none());
    }
}
