use std::time::Duration;

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use uuid::Uuid;

use crate::{
    error::QueueError,
    models::{ExecutionResult, Job, Language, now_ms},
    queue::{Delivery, QueueBackend},
};

const ENQUEUE_LUA: &str = r#"
if redis.call('LLEN', KEYS[1]) >= tonumber(ARGV[2]) then
  return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
return 1
"#;

const DEQUEUE_LUA: &str = r#"
local payload = redis.call('RPOP', KEYS[1])
if not payload then
  return false
end
local job = cjson.decode(payload)
job.deliveries = (job.deliveries or 0) + 1
local leased = cjson.encode(job)
redis.call('ZADD', KEYS[2], ARGV[1], leased)
return leased
"#;

const REAP_LUA: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], 0, ARGV[1])
for _, payload in ipairs(expired) do
  redis.call('ZREM', KEYS[2], payload)
  redis.call('LPUSH', KEYS[1], payload)
end
return #expired
"#;

/// Durable queue backend on Redis.
///
/// Per language: a pending list and a processing ZSET scored by lease
/// deadline. Dequeue atomically moves a payload from pending to processing;
/// ack removes it; the reaper pushes deadline-expired payloads back onto
/// pending. Results live under their own key with `SET NX EX`, which gives
/// both the exactly-once publish and the retention TTL in one primitive.
pub struct RedisQueue {
    manager: ConnectionManager,
    key_prefix: String,
    capacity: usize,
    lease_ms: u64,
    result_ttl_secs: u64,
    poll_interval: Duration,
}

impl RedisQueue {
    pub async fn connect(
        url: &str,
        key_prefix: String,
        capacity: usize,
        lease_ms: u64,
        result_ttl_secs: u64,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            key_prefix,
            capacity,
            lease_ms,
            result_ttl_secs,
            poll_interval: Duration::from_millis(100),
        })
    }

    fn pending_key(&self, language: Language) -> String {
        format!("{}:jobs:{}:pending", self.key_prefix, language.as_str())
    }

    fn processing_key(&self, language: Language) -> String {
        format!("{}:jobs:{}:processing", self.key_prefix, language.as_str())
    }

    fn result_key(&self, job_id: Uuid) -> String {
        format!("{}:results:{}", self.key_prefix, job_id)
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(&job)?;
        let accepted: i64 = Script::new(ENQUEUE_LUA)
            .key(self.pending_key(job.language))
            .arg(payload)
            .arg(self.capacity as i64)
            .invoke_async(&mut conn)
            .await?;
        if accepted == 0 {
            return Err(QueueError::Full);
        }
        Ok(())
    }

    async fn dequeue(&self, language: Language) -> Result<Delivery, QueueError> {
        let mut conn = self.manager.clone();
        loop {
            let deadline = now_ms() + self.lease_ms;
            let leased: Option<String> = Script::new(DEQUEUE_LUA)
                .key(self.pending_key(language))
                .key(self.processing_key(language))
                .arg(deadline)
                .invoke_async(&mut conn)
                .await?;
            if let Some(receipt) = leased {
                let job: Job = serde_json::from_str(&receipt)?;
                return Ok(Delivery { job, receipt });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, language: Language, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _removed: i64 = redis::cmd("ZREM")
            .arg(self.processing_key(language))
            .arg(&delivery.receipt)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(result)?;
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.result_key(result.job_id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.result_ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        if stored.is_none() {
            return Err(QueueError::DuplicateResult(result.job_id));
        }
        Ok(())
    }

    async fn fetch_result(&self, job_id: Uuid) -> Result<Option<ExecutionResult>, QueueError> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.result_key(job_id))
            .query_async(&mut conn)
            .await?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn reap_expired(&self, language: Language) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let requeued: i64 = Script::new(REAP_LUA)
            .key(self.pending_key(language))
            .key(self.processing_key(language))
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(requeued.max(0) as usize)
    }
}
