use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Delay schedule applied between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffPolicy {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_delay_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_delay_ms: Option<u64>,
    },
}

impl BackoffPolicy {
    /// Delay before the retry that follows `attempts` completed executions.
    ///
    /// Exponential growth is `base * 2^(attempts-1)`, capped when a cap is
    /// configured. `attempts` of zero is treated as one.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let attempts = attempts.max(1);

        let millis = match self {
            BackoffPolicy::Fixed { delay_ms } => *delay_ms,
            BackoffPolicy::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => {
                let factor = 2u64.saturating_pow(attempts - 1);
                let raw = base_delay_ms.saturating_mul(factor);
                match max_delay_ms {
                    Some(cap) => raw.min(*cap),
                    None => raw,
                }
            }
        };

        Duration::from_millis(millis)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base_delay_ms: 1_000,
            max_delay_ms: Some(60_000),
        }
    }
}

/// One unit of deferred work. The queue store is the single source of truth
/// for this record's state; workers never cache it across polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub idempotency_key: String,
    pub name: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub priority: i32,
    pub available_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Waiting | JobStatus::Delayed) && self.available_at <= now
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Identifies the record created by an enqueue call, or the pre-existing
/// record when the idempotency key matched one already in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub idempotency_key: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub priority: Option<i32>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    pub idempotency_key: Option<String>,
}

impl EnqueueOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
