use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, JobType};
use crate::models::options::{ValidationError, WatermarkSpec};
use crate::services::queue::{QueueError, WorkItem, WorkQueue};

/// Wire form of a submission: `{"type", "inputKey", "options"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub input_key: String,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl SubmitRequest {
    pub fn into_spec(self) -> Result<(String, WatermarkSpec), ValidationError> {
        let spec = WatermarkSpec::from_parts(self.job_type, self.options)
            .map_err(|e| ValidationError(format!("options: {e}")))?;
        Ok((self.input_key, spec))
    }
}

/// Submitted options object, or `{}` when it is not an object.
fn submitted_options(options: &serde_json::Value) -> serde_json::Value {
    match options {
        serde_json::Value::Object(_) => options.clone(),
        _ => empty_options(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to record job: {0}")]
    Record(#[from] StoreError),

    /// The job record exists but nothing will ever process it.
    #[error("Job {job_id} was recorded but could not be enqueued: {source}")]
    Enqueue {
        job_id: Uuid,
        #[source]
        source: QueueError,
    },
}

/// Records a job and then enqueues its work item.
///
/// The two writes go to independent systems and are not atomic. The record is
/// always written first so no worker can claim an item without one; if the
/// enqueue then fails the job stays `queued` with no queue entry and is
/// reported through [`SubmitError::Enqueue`].
#[derive(Clone)]
pub struct Producer {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
}

impl Producer {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { jobs, queue }
    }

    pub async fn submit(&self, input_key: &str, spec: WatermarkSpec) -> Result<Uuid, SubmitError> {
        let options = spec.options_value();
        self.record_and_enqueue(input_key, spec, options).await
    }

    /// Submit a wire request. The job record keeps the options object exactly
    /// as submitted; the work item carries the parsed spec.
    pub async fn submit_request(&self, request: SubmitRequest) -> Result<Uuid, SubmitError> {
        let options = submitted_options(&request.options);
        let (input_key, spec) = request.into_spec()?;
        self.record_and_enqueue(&input_key, spec, options).await
    }

    async fn record_and_enqueue(
        &self,
        input_key: &str,
        spec: WatermarkSpec,
        options: serde_json::Value,
    ) -> Result<Uuid, SubmitError> {
        if input_key.trim().is_empty() {
            return Err(ValidationError("inputKey: must not be blank".into()).into());
        }
        spec.validate()?;

        let job_id = Uuid::new_v4();
        let job_type = spec.job_type();
        let job = Job::queued(job_id, job_type, input_key.to_string(), options);
        self.jobs.create(&job).await?;

        let item = WorkItem {
            job_id,
            input_key: input_key.to_string(),
            spec,
        };
        if let Err(source) = self.queue.enqueue(&item).await {
            tracing::error!(
                job_id = %job_id,
                error = %source,
                "Job recorded but enqueue failed; record is orphaned in queued state"
            );
            metrics::counter!("watermark_jobs_orphaned_total").increment(1);
            return Err(SubmitError::Enqueue { job_id, source });
        }

        metrics::counter!("watermark_jobs_submitted_total", "type" => job_type.to_string())
            .increment(1);
        tracing::info!(job_id = %job_id, job_type = %job_type, input_key, "Enqueued watermark job");

        Ok(job_id)
    }
}
