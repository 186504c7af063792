use axum::extract::{Query, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::upload::{JobStatusResponse, StatusQuery};

/// GET /job-status?id=<jobId> — current job row and its processed photos.
///
/// Read-only. A job still `queued` or `processing` comes back with no photos.
pub async fn get_job_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let raw = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("missing `id` query parameter".to_string()))?;

    let job_id = Uuid::parse_str(raw)
        .map_err(|_| ApiError::Validation(format!("`id` is not a valid job id: {raw}")))?;

    let job = state
        .metadata
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    let photos = state.metadata.photos_for_job(job_id).await?;

    Ok(Json(JobStatusResponse { job, photos }))
}
