use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the pipeline's metrics with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "watermark_jobs_submitted_total",
        "Total watermark jobs accepted for processing"
    );
    metrics::describe_counter!(
        "watermark_jobs_orphaned_total",
        "Jobs recorded but never enqueued"
    );
    metrics::describe_counter!(
        "watermark_jobs_completed_total",
        "Total watermark jobs completed"
    );
    metrics::describe_counter!(
        "watermark_jobs_failed_total",
        "Total watermark jobs that ran out of attempts"
    );
    metrics::describe_counter!(
        "watermark_jobs_retried_total",
        "Failed attempts scheduled for another delivery"
    );
    metrics::describe_histogram!(
        "watermark_processing_seconds",
        "Time to process one delivery of a watermark job"
    );
    metrics::describe_gauge!(
        "watermark_queue_depth",
        "Current number of pending work items"
    );
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
