pub mod health;
pub mod metrics;
pub mod watermark;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Job submission, status and health routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/watermark/text", post(watermark::submit_text))
        .route("/api/v1/watermark/image", post(watermark::submit_image))
        .route("/api/v1/jobs", post(watermark::submit_job))
        .route(
            "/api/v1/watermark/status/{job_id}",
            get(watermark::get_job_status),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
}
