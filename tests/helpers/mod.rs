//! Test helper utilities for E2E testing against a running API and worker

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /upload
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub key: String,
    pub status: String,
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: Uuid,
    pub source_key: String,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub photo_id: Uuid,
    pub output_key: String,
}

/// Response from GET /job-status
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job: JobView,
    pub photos: Vec<PhotoView>,
}

/// Encode a flat-colour JPEG of the given size
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([70, 90, 110]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .expect("Failed to encode JPEG");
    buf
}

/// Upload bytes to the ingestion endpoint
pub async fn upload_photo(
    client: &reqwest::Client,
    base_url: &str,
    bytes: Vec<u8>,
    listing_id: Option<&str>,
) -> Result<UploadResponse, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?,
    );
    if let Some(id) = listing_id {
        form = form.text("listingId", id.to_string());
    }

    let response = client
        .post(format!("{}/upload", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<UploadResponse>().await?)
}

/// Poll job status until done or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/job-status", base_url))
            .query(&[("id", job_id.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.job.status.as_str() {
            "done" | "failed" => return Ok(status_response),
            "queued" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => {
                return Err(format!("Unknown job status: {}", other).into());
            }
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
