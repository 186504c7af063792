use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::photo::ProcessedPhoto;

/// Optional text fields accompanying an upload.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[garde(length(min = 1, max = 128))]
    pub listing_id: Option<String>,
}

/// Response after accepting an upload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub key: String,
    pub status: JobStatus,
    pub job_id: Uuid,
}

/// Query string of `GET /job-status`.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: Option<String>,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job: Job,
    pub photos: Vec<ProcessedPhoto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_listing_id_is_rejected() {
        let meta = UploadMetadata {
            listing_id: Some(String::new()),
        };
        assert!(meta.validate().is_err());
    }

    #[test]
    fn absent_listing_id_is_accepted() {
        assert!(UploadMetadata::default().validate().is_ok());
        let meta = UploadMetadata {
            listing_id: Some("MLS-4411".to_string()),
        };
        assert!(meta.validate().is_ok());
    }
}
