//! Durable, leased, retrying delivery of watermark work items.
//!
//! Every claim takes a time-bounded lease and counts as one attempt. A
//! delivery is either acknowledged, failed (delayed retry with exponential
//! backoff, or dead-lettered once attempts run out), or left to expire, in
//! which case [`WorkQueue::reap`] hands it to another worker.

mod memory;
mod redis;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::models::options::WatermarkSpec;

/// Queue payload. Carries everything a worker needs without reading the job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub input_key: String,
    pub spec: WatermarkSpec,
}

/// A leased work item.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    /// 1-based delivery attempt.
    pub attempt: u32,
    receipt: String,
}

impl Delivery {
    pub(crate) fn new(item: WorkItem, attempt: u32, receipt: String) -> Self {
        Self {
            item,
            attempt,
            receipt,
        }
    }

    pub(crate) fn receipt(&self) -> &str {
        &self.receipt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// Out of attempts; moved to the dead-letter list.
    Exhausted { attempts: u32 },
    /// The lease had already expired and the item was handed out again.
    LeaseLost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Expired leases and due retries moved back to pending.
    pub redelivered: u64,
    /// Jobs whose lease expired on their final attempt.
    pub exhausted: Vec<Uuid>,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn settings(&self) -> &QueueSettings;

    async fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Lease the next pending item, if any.
    async fn claim(&self) -> Result<Option<Delivery>, QueueError>;

    /// Release a successfully processed delivery. Returns false if the lease
    /// had already expired.
    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, QueueError>;

    async fn reap(&self) -> Result<ReapOutcome, QueueError>;

    /// Number of items waiting to be claimed.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Delay before retrying after `attempt` failed: `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}
