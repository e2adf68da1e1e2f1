use chrono::Utc;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clients::queue::{QueueError, QueueStore};
use crate::models::job::{BackoffPolicy, EnqueueOptions, Job, JobHandle, JobStatus};

#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("could not enqueue job: {0}")]
    Store(#[from] QueueError),

    #[error("payload is not serializable: {0}")]
    Payload(String),
}

/// Per-producer defaults applied when an enqueue call leaves an option
/// unset.
#[derive(Debug, Clone)]
pub struct ProducerDefaults {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub priority: i32,
}

impl Default for ProducerDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            priority: 0,
        }
    }
}

/// Enqueues job records against an injected store capability.
pub struct JobProducer<S: QueueStore> {
    store: Arc<S>,
    defaults: ProducerDefaults,
}

impl<S: QueueStore> JobProducer<S> {
    pub fn new(store: Arc<S>, defaults: ProducerDefaults) -> Self {
        Self { store, defaults }
    }

    pub async fn enqueue(
        &self,
        name: &str,
        payload: JsonValue,
        options: EnqueueOptions,
    ) -> Result<JobHandle, EnqueueError> {
        let idempotency_key = match options.idempotency_key {
            Some(key) => key,
            None => derive_idempotency_key(name, &payload)?,
        };

        let now = Utc::now();
        let available_at = match options.delay {
            Some(delay) => {
                now + chrono::Duration::from_std(delay)
                    .map_err(|e| EnqueueError::Payload(format!("delay out of range: {e}")))?
            }
            None => now,
        };

        let job = Job {
            id: Uuid::new_v4(),
            idempotency_key,
            name: name.to_string(),
            payload,
            status: if available_at > now {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.defaults.max_attempts),
            backoff: options.backoff.unwrap_or_else(|| self.defaults.backoff.clone()),
            priority: options.priority.unwrap_or(self.defaults.priority),
            available_at,
            enqueued_at: now,
        };

        let handle = self.store.enqueue(job).await?;

        if handle.deduplicated {
            debug!(
                job_id = %handle.id,
                job_name = name,
                idempotency_key = %handle.idempotency_key,
                "Duplicate enqueue resolved to existing job"
            );
        } else {
            info!(
                job_id = %handle.id,
                job_name = name,
                idempotency_key = %handle.idempotency_key,
                "Job enqueued"
            );
        }

        Ok(handle)
    }

    /// Cancel a job that has not started running. Active jobs are not
    /// interruptible; the call reports `false` for them.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, EnqueueError> {
        let cancelled = self.store.cancel(id).await?;
        if cancelled {
            info!(job_id = %id, "Job cancelled");
        }
        Ok(cancelled)
    }
}

/// Content-derived idempotency key: SHA-256 over the job name and the
/// payload's canonical JSON. serde_json keeps object keys sorted, so equal
/// payloads always hash equally, and the key carries no wall-clock
/// component at all: the same logical work always maps to the same key, no
/// matter when or how often it is enqueued.
pub fn derive_idempotency_key(name: &str, payload: &JsonValue) -> Result<String, EnqueueError> {
    let canonical =
        serde_json::to_string(payload).map_err(|e| EnqueueError::Payload(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
