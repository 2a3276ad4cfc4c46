use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use image::ImageFormat;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::job::Job;
use crate::models::options::{ImageOptions, TextOptions, WatermarkSpec};
use crate::services::producer::{SubmitError, SubmitRequest};

const RAW_FOLDER: &str = "raw";
const ACCEPTED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

#[derive(Debug, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
}

/// Multipart body split into binary parts and text parts.
#[derive(Default)]
struct UploadForm {
    files: HashMap<String, Bytes>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart, file_fields: &[&str]) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("Failed to read multipart: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if file_fields.contains(&name.as_str()) {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read {name}: {e}")))?;
                form.files.insert(name, data);
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read {name}: {e}")))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn file(&mut self, name: &str, missing: &str) -> Result<Bytes, ApiError> {
        self.files
            .remove(name)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| ApiError::Validation(missing.to_string()))
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
        self.text(name)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|_| ApiError::Validation(format!("{name}: must be a number")))
            })
            .transpose()
    }
}

/// Sniff the upload and return the file extension to store it under.
fn accepted_extension(data: &[u8]) -> Result<&'static str, ApiError> {
    let format = image::guess_format(data)
        .ok()
        .filter(|f| ACCEPTED_FORMATS.contains(f))
        .ok_or_else(|| {
            ApiError::UnsupportedMedia("Only JPEG, PNG and WebP images are accepted".into())
        })?;
    Ok(format.extensions_str().first().copied().unwrap_or("bin"))
}

async fn store_upload(state: &AppState, data: Bytes) -> Result<String, ApiError> {
    let extension = accepted_extension(&data)?;
    Ok(state.storage.store(data, RAW_FOLDER, Some(extension)).await?)
}

/// Submit and, if the job was never recorded, drop the uploads it referenced.
async fn submit_uploaded(
    state: &AppState,
    input_key: &str,
    spec: WatermarkSpec,
    uploaded: &[&str],
) -> Result<Uuid, ApiError> {
    match state.producer.submit(input_key, spec).await {
        Ok(job_id) => Ok(job_id),
        Err(e @ (SubmitError::Validation(_) | SubmitError::Record(_))) => {
            for key in uploaded {
                state.storage.delete(key).await;
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /api/v1/watermark/text: upload an image and queue a text watermark.
#[tracing::instrument(skip_all)]
pub async fn submit_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let mut form = UploadForm::read(multipart, &["file"]).await?;
    let file = form.file("file", "Image file is required")?;

    let options = TextOptions {
        text: form.text("text").unwrap_or_default(),
        font_size: form.parse("fontSize")?,
        gravity: form.text("gravity"),
        opacity: form.parse("opacity")?,
    };
    let spec = WatermarkSpec::Text(options);
    spec.validate()?;

    let input_key = store_upload(&state, file).await?;
    let job_id = submit_uploaded(&state, &input_key, spec, &[input_key.as_str()]).await?;

    Ok((StatusCode::CREATED, Json(JobCreatedResponse { job_id })))
}

/// POST /api/v1/watermark/image: upload an image and a logo and queue an image watermark.
#[tracing::instrument(skip_all)]
pub async fn submit_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let mut form = UploadForm::read(multipart, &["file", "watermark"]).await?;
    let file = form.file("file", "Image file is required")?;
    let watermark = form.file("watermark", "Watermark image file is required")?;

    let width = form.parse("width")?;
    let gravity = form.text("gravity");
    let opacity = form.parse("opacity")?;

    let input_key = store_upload(&state, file).await?;
    let watermark_key = match store_upload(&state, watermark).await {
        Ok(key) => key,
        Err(e) => {
            state.storage.delete(&input_key).await;
            return Err(e);
        }
    };

    let spec = WatermarkSpec::Image(ImageOptions {
        watermark_key: watermark_key.clone(),
        width,
        gravity,
        opacity,
    });
    let uploaded = [input_key.as_str(), watermark_key.as_str()];
    let job_id = submit_uploaded(&state, &input_key, spec, &uploaded).await?;

    Ok((StatusCode::CREATED, Json(JobCreatedResponse { job_id })))
}

/// POST /api/v1/jobs: queue a job for inputs that are already in storage.
#[tracing::instrument(skip_all)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let job_id = state.producer.submit_request(request).await?;
    Ok((StatusCode::CREATED, Json(JobCreatedResponse { job_id })))
}

/// GET /api/v1/watermark/status/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.status.get_status(job_id).await?))
}
