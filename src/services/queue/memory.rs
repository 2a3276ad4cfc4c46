use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{backoff_delay, Delivery, FailOutcome, QueueError, ReapOutcome, WorkItem, WorkQueue};
use crate::config::QueueSettings;

#[derive(Default)]
struct State {
    pending: VecDeque<WorkItem>,
    /// Active leases by lease token.
    leases: HashMap<Uuid, (Instant, WorkItem)>,
    delayed: Vec<(Instant, WorkItem)>,
    attempts: HashMap<Uuid, u32>,
    dead: Vec<WorkItem>,
}

/// In-process queue with the same lease and retry rules as [`super::RedisQueue`].
#[derive(Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    settings: QueueSettings,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            settings,
        }
    }

    pub async fn dead_letters(&self) -> Vec<WorkItem> {
        self.state.lock().await.dead.clone()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leases.len()
    }

    pub async fn delayed(&self) -> usize {
        self.state.lock().await.delayed.len()
    }
}

/// Remove the lease held by `delivery`, if it is still the live one.
fn release(state: &mut State, delivery: &Delivery) -> Option<WorkItem> {
    let token = Uuid::parse_str(delivery.receipt()).ok()?;
    state.leases.remove(&token).map(|(_, item)| item)
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        self.state.lock().await.pending.push_back(item.clone());
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(item) = state.pending.pop_front() else {
            return Ok(None);
        };

        let attempt = {
            let counter = state.attempts.entry(item.job_id).or_insert(0);
            *counter += 1;
            *counter
        };
        let token = Uuid::new_v4();
        state
            .leases
            .insert(token, (Instant::now() + self.settings.lease, item.clone()));

        Ok(Some(Delivery::new(item, attempt, token.to_string())))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if release(&mut state, delivery).is_none() {
            return Ok(false);
        }
        state.attempts.remove(&delivery.item.job_id);
        Ok(true)
    }

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let job_id = delivery.item.job_id;
        let Some(item) = release(&mut state, delivery) else {
            return Ok(FailOutcome::LeaseLost);
        };

        let attempts = state.attempts.get(&job_id).copied().unwrap_or(0);
        if attempts >= self.settings.max_attempts {
            state.attempts.remove(&job_id);
            state.dead.push(item);
            return Ok(FailOutcome::Exhausted { attempts });
        }

        let delay = backoff_delay(self.settings.backoff, delivery.attempt);
        state.delayed.push((Instant::now() + delay, item));
        Ok(FailOutcome::Retry {
            next_attempt: delivery.attempt + 1,
            delay,
        })
    }

    async fn reap(&self) -> Result<ReapOutcome, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut outcome = ReapOutcome::default();

        let expired: Vec<Uuid> = state
            .leases
            .iter()
            .filter(|(_, (expires, _))| *expires <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            let Some((_, item)) = state.leases.remove(&token) else {
                continue;
            };
            let job_id = item.job_id;
            let attempts = state.attempts.get(&job_id).copied().unwrap_or(0);
            if attempts >= self.settings.max_attempts {
                state.attempts.remove(&job_id);
                state.dead.push(item);
                outcome.exhausted.push(job_id);
            } else {
                state.pending.push_front(item);
                outcome.redelivered += 1;
            }
        }

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        state.delayed = waiting;
        for (_, item) in due {
            state.pending.push_front(item);
            outcome.redelivered += 1;
        }

        Ok(outcome)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
