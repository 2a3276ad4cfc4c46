//! Test images, watermark specs and in-process pipeline wiring

#![allow(dead_code)]

use ab_glyph::FontArc;
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use watermark_jobs::config::QueueSettings;
use watermark_jobs::db::{JobStore, MemoryJobStore, StoreError};
use watermark_jobs::models::job::Job;
use watermark_jobs::models::options::{
    ImageOptions, ImageWatermark, TextOptions, TextWatermark, WatermarkSpec,
};
use watermark_jobs::services::imaging::{ImageProcessor, ImagingError};
use watermark_jobs::services::queue::{
    Delivery, FailOutcome, MemoryQueue, QueueError, ReapOutcome, WorkItem, WorkQueue,
};
use watermark_jobs::services::storage::LocalStorage;
use watermark_jobs::services::worker::WorkerContext;

pub const PUBLIC_ROOT: &str = "/static";

/// Encode a solid-colour PNG.
pub fn solid_png(width: u32, height: u32, colour: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(colour));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// DejaVu Sans Bold, bundled so text rendering never depends on system fonts.
pub fn bundled_font() -> FontArc {
    FontArc::try_from_slice(include_bytes!("fonts/DejaVuSans-Bold.ttf")).unwrap()
}

pub fn text_spec(text: &str, gravity: Option<&str>) -> WatermarkSpec {
    WatermarkSpec::Text(TextOptions {
        text: text.to_string(),
        font_size: None,
        gravity: gravity.map(str::to_string),
        opacity: None,
    })
}

pub fn image_spec(watermark_key: &str) -> WatermarkSpec {
    WatermarkSpec::Image(ImageOptions {
        watermark_key: watermark_key.to_string(),
        width: None,
        gravity: None,
        opacity: None,
    })
}

/// Queue settings with no backoff and a short lease.
pub fn fast_settings(max_attempts: u32) -> QueueSettings {
    QueueSettings {
        concurrency: 2,
        max_attempts,
        lease: Duration::from_secs(30),
        backoff: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Text(TextWatermark, (u32, u32)),
    Image(ImageWatermark, (u32, u32)),
}

/// Processor that records what it was asked to render and returns a fixed PNG.
#[derive(Default)]
pub struct RecordingProcessor {
    pub calls: Mutex<Vec<Applied>>,
}

impl RecordingProcessor {
    pub fn calls(&self) -> Vec<Applied> {
        self.calls.lock().unwrap().clone()
    }
}

fn dimensions(bytes: &[u8]) -> Result<(u32, u32), ImagingError> {
    let img = image::load_from_memory(bytes).map_err(ImagingError::Decode)?;
    Ok((img.width(), img.height()))
}

impl ImageProcessor for RecordingProcessor {
    fn apply_text(&self, base: &[u8], mark: &TextWatermark) -> Result<Vec<u8>, ImagingError> {
        let dims = dimensions(base)?;
        self.calls
            .lock()
            .unwrap()
            .push(Applied::Text(mark.clone(), dims));
        Ok(solid_png(dims.0, dims.1, [255, 255, 255, 255]))
    }

    fn apply_image(
        &self,
        base: &[u8],
        watermark: &[u8],
        mark: &ImageWatermark,
    ) -> Result<Vec<u8>, ImagingError> {
        let dims = dimensions(base)?;
        dimensions(watermark).map_err(|_| ImagingError::EmptyImage)?;
        self.calls
            .lock()
            .unwrap()
            .push(Applied::Image(mark.clone(), dims));
        Ok(solid_png(dims.0, dims.1, [0, 0, 0, 255]))
    }
}

/// In-memory store and queue plus local storage in a temp dir.
pub struct Pipeline {
    pub dir: TempDir,
    pub jobs: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub storage: Arc<LocalStorage>,
    pub processor: Arc<RecordingProcessor>,
}

impl Pipeline {
    pub fn new(settings: QueueSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("uploads"), PUBLIC_ROOT).unwrap();
        Self {
            dir,
            jobs: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryQueue::new(settings)),
            storage: Arc::new(storage),
            processor: Arc::new(RecordingProcessor::default()),
        }
    }

    pub fn worker(&self) -> WorkerContext {
        WorkerContext::new(
            self.jobs.clone(),
            self.queue.clone(),
            self.storage.clone(),
            self.processor.clone(),
        )
    }
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Job store whose database is unreachable.
pub struct UnavailableJobStore;

#[async_trait]
impl JobStore for UnavailableJobStore {
    async fn create(&self, _job: &Job) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn get(&self, _job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Err(unavailable())
    }

    async fn mark_processing(&self, _job_id: Uuid, _attempt: u32) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn mark_completed(&self, _job_id: Uuid, _output_path: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn mark_failed(&self, _job_id: Uuid, _error: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

/// In-memory store whose first `mark_completed` fails after the output has
/// been written, like a worker dying between the two writes.
pub struct CompletionFailsOnce {
    pub inner: Arc<MemoryJobStore>,
    tripped: AtomicBool,
}

impl CompletionFailsOnce {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl JobStore for CompletionFailsOnce {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.create(job).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get(job_id).await
    }

    async fn mark_processing(&self, job_id: Uuid, attempt: u32) -> Result<(), StoreError> {
        self.inner.mark_processing(job_id, attempt).await
    }

    async fn mark_completed(&self, job_id: Uuid, output_path: &str) -> Result<(), StoreError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.mark_completed(job_id, output_path).await
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.mark_failed(job_id, error).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Work queue whose Redis connection is refused.
pub struct UnavailableQueue {
    settings: QueueSettings,
}

impl UnavailableQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self { settings }
    }
}

fn refused() -> QueueError {
    QueueError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl WorkQueue for UnavailableQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, _item: &WorkItem) -> Result<(), QueueError> {
        Err(refused())
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        Err(refused())
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<bool, QueueError> {
        Err(refused())
    }

    async fn fail(&self, _delivery: &Delivery) -> Result<FailOutcome, QueueError> {
        Err(refused())
    }

    async fn reap(&self) -> Result<ReapOutcome, QueueError> {
        Err(refused())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Err(refused())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Err(refused())
    }
}
