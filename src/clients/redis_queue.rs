use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::queue::{QueueError, QueueStore};
use crate::config::Config;
use crate::models::job::{Job, JobHandle, JobStatus};

/// Priority dominates the ready-queue score; enqueue time (ms) breaks ties.
/// Millisecond timestamps stay below 2^42, so the combined score is exact
/// in a float well past any realistic priority.
const PRIORITY_SHIFT: i64 = 1 << 42;

// Dedup check, record insert, and routing to the delayed or ready set in
// one atomic step. Returns {0, existing_id} on a dedup hit.
const ENQUEUE_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
  return {0, existing}
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[2]))
redis.call('HSET', KEYS[2], 'data', ARGV[3], 'status', ARGV[4], 'attempts', 0, 'available_at_ms', ARGV[5])
if tonumber(ARGV[5]) > tonumber(ARGV[6]) then
  redis.call('ZADD', KEYS[3], tonumber(ARGV[5]), ARGV[1])
  redis.call('HSET', KEYS[5], ARGV[1], ARGV[7])
else
  redis.call('ZADD', KEYS[4], tonumber(ARGV[7]), ARGV[1])
end
return {1, ARGV[1]}
"#;

// Promote due delayed members, then pop the lowest-scored ready member and
// mark it active. Concurrent claimers race on ZPOPMIN; the loser sees an
// empty pop and moves on.
const CLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now)
for _, id in ipairs(due) do
  local score = redis.call('HGET', KEYS[3], id)
  if score then
    redis.call('ZADD', KEYS[2], tonumber(score), id)
    redis.call('HDEL', KEYS[3], id)
  end
  redis.call('ZREM', KEYS[1], id)
end
local popped = redis.call('ZPOPMIN', KEYS[2])
if #popped == 0 then
  return false
end
local id = popped[1]
local key = ARGV[2] .. id
if redis.call('EXISTS', key) == 0 then
  return false
end
redis.call('HSET', key, 'status', 'active')
local attempts = redis.call('HINCRBY', key, 'attempts', 1)
redis.call('ZADD', KEYS[4], now, id)
local data = redis.call('HGET', key, 'data')
return {id, data, attempts}
"#;

// Cancellation races against claiming, so the status check and removal
// must be a single step. The dedup key goes with the record so the same
// content can be enqueued again after a cancel.
const CANCEL_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if status ~= 'waiting' and status ~= 'delayed' then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('DEL', KEYS[1])
redis.call('DEL', KEYS[5])
return 1
"#;

pub struct RedisQueueStore {
    connection: MultiplexedConnection,
    namespace: String,
    dedup_ttl_seconds: u64,
    retention_seconds: u64,
}

impl RedisQueueStore {
    pub async fn connect(config: &Config) -> Result<Self, QueueError> {
        info!(namespace = %config.queue_namespace, "Connecting to queue store");

        let client = Client::open(config.broker_url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Queue store connection established");

        Ok(Self {
            connection,
            namespace: config.queue_namespace.clone(),
            dedup_ttl_seconds: config.dedup_ttl_seconds,
            retention_seconds: config.retention_seconds,
        })
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{}", self.namespace, id)
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.namespace)
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.namespace, idempotency_key)
    }

    fn delayed_key(&self, name: &str) -> String {
        format!("{}:delayed:{}", self.namespace, name)
    }

    fn ready_key(&self, name: &str) -> String {
        format!("{}:ready:{}", self.namespace, name)
    }

    fn scores_key(&self) -> String {
        format!("{}:scores", self.namespace)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.namespace)
    }

    fn ready_score(priority: i32, at_ms: i64) -> i64 {
        i64::from(priority) * PRIORITY_SHIFT + at_ms
    }

    /// The hash fields are authoritative for mutable state; the serialized
    /// record carries everything else.
    fn compose_job(
        data: &str,
        status: JobStatus,
        attempts: u32,
        available_at_ms: Option<i64>,
    ) -> Result<Job, QueueError> {
        let mut job: Job = serde_json::from_str(data)?;
        job.status = status;
        job.attempts = attempts;
        if let Some(ms) = available_at_ms
            && let Some(at) = chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single()
        {
            job.available_at = at;
        }
        Ok(job)
    }

    async fn claim_one(&self, name: &str) -> Result<Option<Job>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.connection.clone();

        let claimed: Option<(String, String, i64)> = Script::new(CLAIM_SCRIPT)
            .key(self.delayed_key(name))
            .key(self.ready_key(name))
            .key(self.scores_key())
            .key(self.active_key())
            .arg(now_ms)
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some((id, data, attempts)) => {
                debug!(job_id = %id, job_name = name, attempts, "Claimed job");
                let job = Self::compose_job(&data, JobStatus::Active, attempts as u32, None)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection.clone();
        let key = self.job_key(id);

        let (data, status, attempts, available_at_ms): (
            Option<String>,
            Option<String>,
            Option<u32>,
            Option<i64>,
        ) = redis::pipe()
            .hget(&key, "data")
            .hget(&key, "status")
            .hget(&key, "attempts")
            .hget(&key, "available_at_ms")
            .query_async(&mut conn)
            .await?;

        let (Some(data), Some(status)) = (data, status) else {
            return Ok(None);
        };

        let status = match status.as_str() {
            "waiting" => JobStatus::Waiting,
            "delayed" => JobStatus::Delayed,
            "active" => JobStatus::Active,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => {
                warn!(job_id = %id, status = other, "Unknown job status in store");
                JobStatus::Waiting
            }
        };

        let job = Self::compose_job(&data, status, attempts.unwrap_or(0), available_at_ms)?;
        Ok(Some(job))
    }

    async fn finish(&self, id: Uuid, status: &str) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let key = self.job_key(id);

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(QueueError::NotFound(id));
        }

        redis::pipe()
            .hset(&key, "status", status)
            .ignore()
            .expire(&key, self.retention_seconds as i64)
            .ignore()
            .zrem(self.active_key(), id.to_string())
            .ignore()
            .hdel(self.scores_key(), id.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        let now = Utc::now();
        let available_at_ms = job.available_at.timestamp_millis();
        let score = Self::ready_score(job.priority, job.enqueued_at.timestamp_millis());
        let initial_status = if available_at_ms > now.timestamp_millis() {
            "delayed"
        } else {
            "waiting"
        };

        let data = serde_json::to_string(&job)?;
        let mut conn = self.connection.clone();

        let (created, id): (i64, String) = Script::new(ENQUEUE_SCRIPT)
            .key(self.dedup_key(&job.idempotency_key))
            .key(self.job_key(job.id))
            .key(self.delayed_key(&job.name))
            .key(self.ready_key(&job.name))
            .key(self.scores_key())
            .arg(job.id.to_string())
            .arg(self.dedup_ttl_seconds)
            .arg(&data)
            .arg(initial_status)
            .arg(available_at_ms)
            .arg(now.timestamp_millis())
            .arg(score)
            .invoke_async(&mut conn)
            .await?;

        let deduplicated = created == 0;
        let id = Uuid::parse_str(&id)
            .map_err(|e| QueueError::Unreachable(format!("malformed job id in store: {e}")))?;

        if deduplicated {
            debug!(
                job_id = %id,
                idempotency_key = %job.idempotency_key,
                "Enqueue resolved to existing record"
            );
        }

        Ok(JobHandle {
            id,
            idempotency_key: job.idempotency_key,
            deduplicated,
        })
    }

    async fn claim_next(&self, names: &[String]) -> Result<Option<Job>, QueueError> {
        for name in names {
            if let Some(job) = self.claim_one(name).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), QueueError> {
        self.finish(id, "completed").await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), QueueError> {
        self.finish(id, "failed").await
    }

    async fn reschedule(&self, id: Uuid, available_at: DateTime<Utc>) -> Result<(), QueueError> {
        let job = self.load(id).await?.ok_or(QueueError::NotFound(id))?;

        let mut conn = self.connection.clone();
        let key = self.job_key(id);
        let id_str = id.to_string();
        let score = Self::ready_score(job.priority, Utc::now().timestamp_millis());

        redis::pipe()
            .hset(&key, "status", "waiting")
            .ignore()
            .hset(&key, "available_at_ms", available_at.timestamp_millis())
            .ignore()
            .zrem(self.active_key(), &id_str)
            .ignore()
            .zadd(
                self.delayed_key(&job.name),
                &id_str,
                available_at.timestamp_millis(),
            )
            .ignore()
            .hset(self.scores_key(), &id_str, score)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let Some(job) = self.load(id).await? else {
            return Ok(false);
        };

        let mut conn = self.connection.clone();
        let cancelled: i64 = Script::new(CANCEL_SCRIPT)
            .key(self.job_key(id))
            .key(self.delayed_key(&job.name))
            .key(self.ready_key(&job.name))
            .key(self.scores_key())
            .key(self.dedup_key(&job.idempotency_key))
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(cancelled == 1)
    }

    async fn requeue_stuck(&self, older_than_secs: u64) -> Result<u64, QueueError> {
        let cutoff_ms = Utc::now().timestamp_millis() - (older_than_secs as i64) * 1_000;
        let mut conn = self.connection.clone();

        let stuck: Vec<String> = conn
            .zrangebyscore(self.active_key(), "-inf", cutoff_ms)
            .await?;

        let mut requeued = 0u64;
        for id_str in stuck {
            let Ok(id) = Uuid::parse_str(&id_str) else {
                continue;
            };
            let Some(job) = self.load(id).await? else {
                let _: () = conn.zrem(self.active_key(), &id_str).await?;
                continue;
            };

            let score = Self::ready_score(job.priority, Utc::now().timestamp_millis());
            redis::pipe()
                .hset(self.job_key(id), "status", "waiting")
                .ignore()
                .zrem(self.active_key(), &id_str)
                .ignore()
                .zadd(self.ready_key(&job.name), &id_str, score)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;

            warn!(job_id = %id, job_name = %job.name, "Requeued job stuck in active state");
            requeued += 1;
        }

        Ok(requeued)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        self.load(id).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        conn.ping::<String>().await?;
        Ok(())
    }
}
