use axum::extract::{Multipart, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::job::JobStatus;
use crate::models::upload::{UploadMetadata, UploadResponse};
use crate::services::queue::QueuedJob;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

struct UploadedFile {
    data: Vec<u8>,
    declared_type: Option<String>,
}

/// Generate a fresh source key. The client filename never contributes, so
/// concurrent uploads of `photo.jpg` cannot overwrite each other.
pub fn source_key(data: &[u8]) -> (String, String) {
    match image::guess_format(data) {
        Ok(format) => {
            let ext = format.extensions_str().first().copied().unwrap_or("bin");
            (
                format!("uploads/{}.{ext}", Uuid::new_v4()),
                format.to_mime_type().to_string(),
            )
        }
        Err(_) => (
            format!("uploads/{}.bin", Uuid::new_v4()),
            FALLBACK_CONTENT_TYPE.to_string(),
        ),
    }
}

/// POST /upload — store the file, record a queued job, publish it, and return
/// without waiting for processing.
pub async fn upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<UploadedFile> = None;
    let mut metadata = UploadMetadata::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if file.is_some() {
                    return Err(ApiError::Validation(
                        "exactly one `file` part is allowed".to_string(),
                    ));
                }
                let declared_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read file: {e}")))?;
                file = Some(UploadedFile {
                    data: data.to_vec(),
                    declared_type,
                });
            }
            Some("listingId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read listingId: {e}")))?;
                metadata.listing_id = Some(text.trim().to_string());
            }
            _ => {}
        }
    }

    let file = file.ok_or(ApiError::MissingFile)?;
    if file.data.is_empty() {
        return Err(ApiError::Validation("`file` part is empty".to_string()));
    }
    metadata
        .validate()
        .map_err(|report| ApiError::Validation(report.to_string()))?;

    let (key, sniffed_type) = source_key(&file.data);
    let content_type = if sniffed_type == FALLBACK_CONTENT_TYPE {
        file.declared_type.unwrap_or(sniffed_type)
    } else {
        sniffed_type
    };

    // The object must exist before any worker can see the job.
    state.storage.put(&key, &file.data, &content_type).await?;

    let job_id = Uuid::new_v4();
    state
        .metadata
        .create_job(job_id, &key, metadata.listing_id.as_deref())
        .await?;

    if let Err(e) = state
        .queue
        .publish(&QueuedJob {
            job_id,
            source_key: key.clone(),
        })
        .await
    {
        tracing::error!(
            job_id = %job_id,
            source_key = %key,
            error = %e,
            "Publish failed, job left queued without a message"
        );
        return Err(e.into());
    }

    metrics::counter!("pipeline_uploads_total").increment(1);
    tracing::info!(
        job_id = %job_id,
        source_key = %key,
        size = file.data.len(),
        content_type = %content_type,
        "Upload accepted"
    );

    Ok(Json(UploadResponse {
        key,
        status: JobStatus::Queued,
        job_id,
    }))
}
