//! Test helper utilities for E2E testing

#![allow(dead_code)]

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from the submission endpoints
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
}

/// Response from GET /api/v1/watermark/status/{job_id}
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub options: serde_json::Value,
    pub error: Option<String>,
}

fn image_part(bytes: Vec<u8>, filename: &str) -> Result<multipart::Part, reqwest::Error> {
    multipart::Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str("image/png")
}

async fn submit(
    client: &reqwest::Client,
    url: String,
    form: multipart::Form,
) -> Result<JobCreatedResponse, Box<dyn std::error::Error>> {
    let response = client.post(url).multipart(form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<JobCreatedResponse>().await?)
}

/// Upload an image to the text watermark endpoint
pub async fn upload_text_watermark(
    client: &reqwest::Client,
    base_url: &str,
    image: Vec<u8>,
    text: &str,
    gravity: Option<&str>,
) -> Result<JobCreatedResponse, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new()
        .part("file", image_part(image, "photo.png")?)
        .text("text", text.to_string());
    if let Some(g) = gravity {
        form = form.text("gravity", g.to_string());
    }

    submit(client, format!("{}/api/v1/watermark/text", base_url), form).await
}

/// Upload an image and a logo to the image watermark endpoint
pub async fn upload_image_watermark(
    client: &reqwest::Client,
    base_url: &str,
    image: Vec<u8>,
    watermark: Vec<u8>,
    width: Option<u32>,
) -> Result<JobCreatedResponse, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new()
        .part("file", image_part(image, "photo.png")?)
        .part("watermark", image_part(watermark, "logo.png")?);
    if let Some(w) = width {
        form = form.text("width", w.to_string());
    }

    submit(client, format!("{}/api/v1/watermark/image", base_url), form).await
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/watermark/status/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" => return Ok(status_response),
            "queued" | "processing" | "failed" => {
                // A failed attempt may still be retried
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unexpected job status: {}", other).into()),
        }
    }

    Err(format!("Job {} did not complete within {}s", job_id, timeout_secs).into())
}
