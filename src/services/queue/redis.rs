use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use super::{backoff_delay, Delivery, FailOutcome, QueueError, ReapOutcome, WorkItem, WorkQueue};
use crate::config::QueueSettings;

const PENDING_KEY: &str = "watermark:pending";
const LEASES_KEY: &str = "watermark:leases";
const LEASED_ITEMS_KEY: &str = "watermark:leased_items";
const DELAYED_KEY: &str = "watermark:delayed";
const ATTEMPTS_KEY: &str = "watermark:attempts";
const DEAD_KEY: &str = "watermark:dead";

// KEYS: pending, leases, leased items, attempts  ARGV: lease expiry (ms), lease token
const CLAIM_SCRIPT: &str = r#"
local raw = redis.call('RPOP', KEYS[1])
if not raw then return false end
local id = cjson.decode(raw).job_id
local attempt = redis.call('HINCRBY', KEYS[4], id, 1)
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[3], ARGV[2], raw)
return {raw, attempt}
"#;

// KEYS: leases, leased items, attempts  ARGV: lease token, job id
const ACK_SCRIPT: &str = r#"
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
if removed == 1 then
  redis.call('HDEL', KEYS[2], ARGV[1])
  redis.call('HDEL', KEYS[3], ARGV[2])
end
return removed
"#;

// KEYS: leases, leased items, delayed, attempts, dead
// ARGV: lease token, job id, max attempts, retry at (ms)
const FAIL_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then return -1 end
local raw = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
if not raw then return -1 end
local attempts = tonumber(redis.call('HGET', KEYS[4], ARGV[2]) or '0')
if attempts >= tonumber(ARGV[3]) then
  redis.call('HDEL', KEYS[4], ARGV[2])
  redis.call('LPUSH', KEYS[5], raw)
  return 0
end
redis.call('ZADD', KEYS[3], ARGV[4], raw)
return 1
"#;

// KEYS: pending, leases, leased items, delayed, attempts, dead
// ARGV: now (ms), max attempts
const REAP_SCRIPT: &str = r#"
local redelivered = 0
local exhausted = {}
for _, token in ipairs(redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])) do
  redis.call('ZREM', KEYS[2], token)
  local raw = redis.call('HGET', KEYS[3], token)
  redis.call('HDEL', KEYS[3], token)
  if raw then
    local id = cjson.decode(raw).job_id
    local attempts = tonumber(redis.call('HGET', KEYS[5], id) or '0')
    if attempts >= tonumber(ARGV[2]) then
      redis.call('HDEL', KEYS[5], id)
      redis.call('LPUSH', KEYS[6], raw)
      table.insert(exhausted, id)
    else
      redis.call('RPUSH', KEYS[1], raw)
      redelivered = redelivered + 1
    end
  end
end
for _, raw in ipairs(redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])) do
  redis.call('ZREM', KEYS[4], raw)
  redis.call('RPUSH', KEYS[1], raw)
  redelivered = redelivered + 1
end
return {redelivered, exhausted}
"#;

/// Redis-backed work queue with leases, delayed retries and a dead-letter list.
///
/// Items are stored as their JSON payload. Each claim mints a lease token that
/// is the delivery's receipt: the lease zset holds tokens and a hash maps each
/// token to its payload, so only the current holder can settle a lease.
/// Attempt counters live in a hash keyed by job ID.
pub struct RedisQueue {
    client: ::redis::Client,
    settings: QueueSettings,
    claim: Script,
    ack: Script,
    fail: Script,
    reap: Script,
}

fn epoch_ms_after(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2)
}

impl RedisQueue {
    pub fn new(redis_url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let client = ::redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            settings,
            claim: Script::new(CLAIM_SCRIPT),
            ack: Script::new(ACK_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            reap: Script::new(REAP_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<::redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Number of dead-lettered items.
    pub async fn dead_letter_count(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(DEAD_KEY).await?)
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(item)?;
        conn.lpush::<_, _, ()>(PENDING_KEY, &payload).await?;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let token = Uuid::new_v4().to_string();
        let claimed: Option<(String, u32)> = self
            .claim
            .key(PENDING_KEY)
            .key(LEASES_KEY)
            .key(LEASED_ITEMS_KEY)
            .key(ATTEMPTS_KEY)
            .arg(epoch_ms_after(self.settings.lease))
            .arg(&token)
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some((raw, attempt)) => {
                let item: WorkItem = serde_json::from_str(&raw)?;
                Ok(Some(Delivery::new(item, attempt, token)))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .ack
            .key(LEASES_KEY)
            .key(LEASED_ITEMS_KEY)
            .key(ATTEMPTS_KEY)
            .arg(delivery.receipt())
            .arg(delivery.item.job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, QueueError> {
        let delay = backoff_delay(self.settings.backoff, delivery.attempt);
        let mut conn = self.connection().await?;
        let code: i64 = self
            .fail
            .key(LEASES_KEY)
            .key(LEASED_ITEMS_KEY)
            .key(DELAYED_KEY)
            .key(ATTEMPTS_KEY)
            .key(DEAD_KEY)
            .arg(delivery.receipt())
            .arg(delivery.item.job_id.to_string())
            .arg(self.settings.max_attempts)
            .arg(epoch_ms_after(delay))
            .invoke_async(&mut conn)
            .await?;

        Ok(match code {
            1 => FailOutcome::Retry {
                next_attempt: delivery.attempt + 1,
                delay,
            },
            0 => FailOutcome::Exhausted {
                attempts: delivery.attempt,
            },
            _ => FailOutcome::LeaseLost,
        })
    }

    async fn reap(&self) -> Result<ReapOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let (redelivered, exhausted): (u64, Vec<String>) = self
            .reap
            .key(PENDING_KEY)
            .key(LEASES_KEY)
            .key(LEASED_ITEMS_KEY)
            .key(DELAYED_KEY)
            .key(ATTEMPTS_KEY)
            .key(DEAD_KEY)
            .arg(Utc::now().timestamp_millis())
            .arg(self.settings.max_attempts)
            .invoke_async(&mut conn)
            .await?;

        let exhausted = exhausted
            .iter()
            .filter_map(|id| match Uuid::parse_str(id) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Dead-lettered item has malformed job id");
                    None
                }
            })
            .collect();

        Ok(ReapOutcome {
            redelivered,
            exhausted,
        })
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(PENDING_KEY).await?)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        ::redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
