//! Error taxonomy shared by the API boundary and the worker.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::MetadataError;
use crate::services::{queue::QueueError, storage::StorageError};

/// Errors surfaced to HTTP callers. Every variant maps to exactly one status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("multipart body has no `file` part")]
    MissingFile,

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("metadata store unavailable: {0}")]
    MetadataUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::StorageUnavailable(_)
            | ApiError::QueueUnavailable(_)
            | ApiError::MetadataUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::MissingFile => "missing_file",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::NotFound(_) => "not_found",
            ApiError::StorageUnavailable(_) => "storage_unavailable",
            ApiError::QueueUnavailable(_) => "queue_unavailable",
            ApiError::MetadataUnavailable(_) => "metadata_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ApiError::NotFound(format!("object {key} not found")),
            other => ApiError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::QueueUnavailable(err.to_string())
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        ApiError::MetadataUnavailable(err.to_string())
    }
}

/// Failures inside the worker, split into retryable and permanent.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("SourceMissing: source object {0} does not exist")]
    SourceMissing(String),

    #[error("DecodeError: {0}")]
    Decode(String),

    #[error("StorageUnavailable: {0}")]
    Storage(StorageError),

    #[error("MetadataUnavailable: {0}")]
    Metadata(#[from] MetadataError),

    #[error("QueueUnavailable: {0}")]
    Queue(#[from] QueueError),
}

impl ProcessingError {
    /// Retryable errors leave the message unacknowledged so the queue
    /// redelivers it after the visibility timeout.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::SourceMissing(_) | ProcessingError::Decode(_) => false,
            // A row that cannot be read back will not heal on redelivery.
            ProcessingError::Metadata(MetadataError::Corrupt(_)) => false,
            ProcessingError::Storage(_)
            | ProcessingError::Metadata(_)
            | ProcessingError::Queue(_) => true,
        }
    }
}

impl From<StorageError> for ProcessingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ProcessingError::SourceMissing(key),
            other => ProcessingError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_documented_status_codes() {
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Validation("id".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RateLimited { retry_after_secs: 3 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::QueueUnavailable("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::StorageUnavailable("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = ApiError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn missing_source_is_permanent_and_outages_are_retryable() {
        let missing: ProcessingError = StorageError::NotFound("uploads/x".into()).into();
        assert!(matches!(missing, ProcessingError::SourceMissing(_)));
        assert!(!missing.is_retryable());
        assert!(!ProcessingError::Decode("bad header".into()).is_retryable());

        let outage: ProcessingError = StorageError::Unavailable("timeout".into()).into();
        assert!(outage.is_retryable());
        assert!(ProcessingError::Metadata(MetadataError::Unavailable("pool".into())).is_retryable());
    }

    #[test]
    fn corrupt_job_row_is_permanent() {
        let corrupt = ProcessingError::Metadata(MetadataError::Corrupt("status 'archived'".into()));
        assert!(!corrupt.is_retryable());
    }
}
