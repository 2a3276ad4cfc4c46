//! Worker pipeline: claim a work item, composite the watermark, store the
//! result and finalize the job record.
//!
//! A failed attempt is written to the job record before the queue hears about
//! it, so the persisted status is already `failed` if the process dies right
//! after. The output key depends only on the job ID, which makes a retry
//! overwrite any partial output from an earlier attempt.

use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::JobStatus;
use crate::models::options::{ImageWatermark, TextWatermark, WatermarkSpec};
use crate::services::imaging::{ImageProcessor, ImagingError};
use crate::services::queue::{Delivery, FailOutcome, QueueError, WorkItem, WorkQueue};
use crate::services::storage::{read_all, StorageDriver, StorageError};

const OUTPUT_CONTENT_TYPE: &str = "image/png";

/// Storage key of a job's result.
pub fn output_key(job_id: Uuid) -> String {
    format!("processed/{job_id}.png")
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("Failed to update job record: {0}")]
    Record(#[from] StoreError),

    #[error("Image task aborted: {0}")]
    Task(#[from] JoinError),
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed { output_path: String },
    /// Attempt failed; the queue will redeliver after `delay`.
    Retrying { error: String, delay: Duration },
    /// Attempt failed and no attempts remain.
    Failed { error: String },
    /// Job was already completed by an earlier delivery.
    Skipped,
    /// No job record exists for the item.
    Orphaned,
    /// Attempt failed but the lease had already been handed to another worker.
    Abandoned { error: String },
}

/// Everything a worker needs, built once at startup and shared by all slots.
pub struct WorkerContext {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn StorageDriver>,
    pub processor: Arc<dyn ImageProcessor>,
}

impl WorkerContext {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn StorageDriver>,
        processor: Arc<dyn ImageProcessor>,
    ) -> Self {
        Self {
            jobs,
            queue,
            storage,
            processor,
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, ProcessingError> {
        let stream = self
            .storage
            .open_stream(key)
            .await
            .map_err(|source| ProcessingError::Read {
                key: key.to_string(),
                source,
            })?;
        read_all(stream).await.map_err(|source| ProcessingError::Read {
            key: key.to_string(),
            source,
        })
    }

    /// Run the watermark pipeline for one item and return the output URL.
    pub async fn execute(&self, item: &WorkItem) -> Result<String, ProcessingError> {
        let base = self.read(&item.input_key).await?;
        let processor = Arc::clone(&self.processor);

        let output = match &item.spec {
            WatermarkSpec::Text(opts) => {
                let mark = TextWatermark::from(opts);
                tokio::task::spawn_blocking(move || processor.apply_text(&base, &mark)).await??
            }
            WatermarkSpec::Image(opts) => {
                let logo = self.read(&opts.watermark_key).await?;
                let mark = ImageWatermark::from(opts);
                tokio::task::spawn_blocking(move || processor.apply_image(&base, &logo, &mark))
                    .await??
            }
        };

        let key = output_key(item.job_id);
        self.storage
            .store_at(Bytes::from(output), &key, OUTPUT_CONTENT_TYPE)
            .await
            .map_err(|source| ProcessingError::Write {
                key: key.clone(),
                source,
            })?;
        let url = self.storage.public_url(&key);

        self.jobs.mark_completed(item.job_id, &url).await?;

        for key in item.spec.source_keys(&item.input_key) {
            self.storage.delete(key).await;
        }

        Ok(url)
    }

    /// Process one delivery end to end and settle it with the queue.
    pub async fn handle(&self, delivery: Delivery) -> DeliveryOutcome {
        let job_id = delivery.item.job_id;
        let attempt = delivery.attempt;

        tracing::info!(
            job_id = %job_id,
            job_type = %delivery.item.spec.job_type(),
            attempt,
            "Processing watermark job"
        );

        match self.jobs.mark_processing(job_id, attempt).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::error!(job_id = %job_id, "Work item has no job record; dropping it");
                self.settle_ack(&delivery).await;
                return DeliveryOutcome::Orphaned;
            }
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                ..
            }) => {
                tracing::info!(job_id = %job_id, "Job already completed; acknowledging redelivery");
                self.settle_ack(&delivery).await;
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not mark job as processing");
            }
        }

        let start = Instant::now();
        let result = self.execute(&delivery.item).await;
        metrics::histogram!("watermark_processing_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(output_path) => {
                self.settle_ack(&delivery).await;
                metrics::counter!("watermark_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    output_path = %output_path,
                    "Job completed successfully"
                );
                DeliveryOutcome::Completed { output_path }
            }
            Err(e) => self.settle_failure(&delivery, e.to_string()).await,
        }
    }

    async fn settle_ack(&self, delivery: &Delivery) {
        match self.queue.ack(delivery).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                job_id = %delivery.item.job_id,
                "Lease expired before acknowledgement; item may run again"
            ),
            Err(e) => tracing::error!(
                job_id = %delivery.item.job_id,
                error = %e,
                "Failed to acknowledge delivery; it will be redelivered after the lease expires"
            ),
        }
    }

    async fn settle_failure(&self, delivery: &Delivery, error: String) -> DeliveryOutcome {
        let job_id = delivery.item.job_id;
        tracing::error!(job_id = %job_id, attempt = delivery.attempt, error = %error, "Job processing failed");

        // Record first, then tell the queue.
        if let Err(e) = self.jobs.mark_failed(job_id, &error).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }

        match self.queue.fail(delivery).await {
            Ok(FailOutcome::Retry {
                next_attempt,
                delay,
            }) => {
                metrics::counter!("watermark_jobs_retried_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Job scheduled for retry"
                );
                DeliveryOutcome::Retrying { error, delay }
            }
            Ok(FailOutcome::Exhausted { attempts }) => {
                metrics::counter!("watermark_jobs_failed_total").increment(1);
                tracing::warn!(job_id = %job_id, attempts, "Job failed after max retries");
                DeliveryOutcome::Failed { error }
            }
            Ok(FailOutcome::LeaseLost) => {
                tracing::warn!(job_id = %job_id, "Lease expired before failure was reported");
                DeliveryOutcome::Abandoned { error }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to report failure to queue; it will be redelivered after the lease expires"
                );
                DeliveryOutcome::Abandoned { error }
            }
        }
    }

    /// Claim and process a single item. `None` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<DeliveryOutcome>, QueueError> {
        match self.queue.claim().await? {
            Some(delivery) => Ok(Some(self.handle(delivery).await)),
            None => Ok(None),
        }
    }

    /// Requeue expired leases and due retries, and fail jobs whose lease ran out
    /// on their last attempt.
    pub async fn reap(&self) {
        match self.queue.reap().await {
            Ok(outcome) => {
                if outcome.redelivered > 0 {
                    tracing::debug!(count = outcome.redelivered, "Moved items back to pending");
                }
                for job_id in outcome.exhausted {
                    let attempts = self.queue.settings().max_attempts;
                    let message = format!("Lease expired after {attempts} attempts");
                    metrics::counter!("watermark_jobs_failed_total").increment(1);
                    tracing::warn!(job_id = %job_id, attempts, "Job lease expired on final attempt");
                    if let Err(e) = self.jobs.mark_failed(job_id, &message).await {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to reap queue"),
        }

        match self.queue.depth().await {
            Ok(depth) => metrics::gauge!("watermark_queue_depth").set(depth as f64),
            Err(e) => tracing::debug!(error = %e, "Failed to read queue depth"),
        }
    }
}

/// A fixed number of slots pulling from the shared queue, plus a reaper.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Run until `shutdown` fires. In-flight items run to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        let settings = *self.ctx.queue.settings();
        let mut tasks = tokio::task::JoinSet::new();

        for slot in 0..settings.concurrency {
            tasks.spawn(slot_loop(Arc::clone(&self.ctx), slot, shutdown.clone()));
        }
        tasks.spawn(reaper_loop(Arc::clone(&self.ctx), shutdown.clone()));

        tracing::info!(concurrency = settings.concurrency, "Worker pool started");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        tracing::info!("Worker pool stopped");
    }
}

async fn idle(period: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(period) => {}
    }
}

async fn slot_loop(ctx: Arc<WorkerContext>, slot: usize, shutdown: CancellationToken) {
    let poll_interval = ctx.queue.settings().poll_interval;
    tracing::debug!(slot, "Worker slot ready");

    while !shutdown.is_cancelled() {
        match ctx.process_next().await {
            Ok(Some(_)) => {
                tracing::debug!(slot, "Job processed, checking for next job");
            }
            Ok(None) => {
                tracing::trace!(slot, "No jobs available, sleeping");
                idle(poll_interval, &shutdown).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Failed to claim work item");
                idle(poll_interval, &shutdown).await;
            }
        }
    }
}

async fn reaper_loop(ctx: Arc<WorkerContext>, shutdown: CancellationToken) {
    let settings = *ctx.queue.settings();
    let period = (settings.lease / 2)
        .min(settings.poll_interval)
        .max(Duration::from_millis(50));

    while !shutdown.is_cancelled() {
        ctx.reap().await;
        idle(period, &shutdown).await;
    }
}
