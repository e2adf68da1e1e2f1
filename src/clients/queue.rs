use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::{Job, JobHandle};

#[derive(Error, Debug)]
pub enum QueueError {
    /// The store could not be reached. Fatal for the affected cycle only;
    /// callers apply their own bounded retry.
    #[error("queue store unreachable: {0}")]
    Unreachable(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("failed to encode job record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unreachable(err.to_string())
    }
}

/// Capability contract against the shared, durable job store. Constructed
/// explicitly and passed in, never a module-level singleton, so tests can
/// substitute a double and a process can hold isolated instances.
///
/// The store owns atomicity: `enqueue` enforces idempotency-key uniqueness
/// within the retention window, and no two concurrent `claim_next` calls
/// return the same record. A lost claim race surfaces as `Ok(None)`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert the record unless its idempotency key already resolves to a
    /// live record, in which case the existing handle is returned with
    /// `deduplicated` set.
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError>;

    /// Atomically claim the next ready record among the given job names:
    /// lowest priority value first, FIFO by enqueue order within a
    /// priority, never before `available_at`. Marks it active and bumps
    /// `attempts`.
    async fn claim_next(&self, names: &[String]) -> Result<Option<Job>, QueueError>;

    async fn mark_completed(&self, id: Uuid) -> Result<(), QueueError>;

    async fn mark_failed(&self, id: Uuid) -> Result<(), QueueError>;

    /// Return a claimed record to the waiting state, not to be dequeued
    /// before `available_at`.
    async fn reschedule(&self, id: Uuid, available_at: DateTime<Utc>) -> Result<(), QueueError>;

    /// Cancel a record that has not started. Returns `false` when the
    /// record is active or terminal; an active job is not interruptible.
    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Requeue records stuck in the active state longer than `older_than`
    /// seconds (a worker died mid-handler). Returns how many were
    /// requeued.
    async fn requeue_stuck(&self, older_than_secs: u64) -> Result<u64, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        (**self).enqueue(job).await
    }

    async fn claim_next(&self, names: &[String]) -> Result<Option<Job>, QueueError> {
        (**self).claim_next(names).await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), QueueError> {
        (**self).mark_completed(id).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), QueueError> {
        (**self).mark_failed(id).await
    }

    async fn reschedule(&self, id: Uuid, available_at: DateTime<Utc>) -> Result<(), QueueError> {
        (**self).reschedule(id, available_at).await
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        (**self).cancel(id).await
    }

    async fn requeue_stuck(&self, older_than_secs: u64) -> Result<u64, QueueError> {
        (**self).requeue_stuck(older_than_secs).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        (**self).get(id).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }
}
