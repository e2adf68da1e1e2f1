use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clients::queue::{QueueError, QueueStore};
use crate::models::job::{Job, JobHandle, JobStatus};

/// In-process `QueueStore` with the same ordering and dedup semantics as
/// the Redis store. Serves as the test double and as the store for
/// single-process deployments.
#[derive(Default)]
pub struct InMemoryQueueStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    dedup: HashMap<String, Uuid>,
    enqueue_seq: HashMap<Uuid, u64>,
    claimed_at: HashMap<Uuid, DateTime<Utc>>,
    next_seq: u64,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-terminal) records, used by tests.
    pub async fn live_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.jobs.values().filter(|j| !j.is_terminal()).count()
    }

    pub async fn status_of(&self, id: Uuid) -> Option<JobStatus> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&id).map(|j| j.status)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing_id) = inner.dedup.get(&job.idempotency_key).copied()
            && inner.jobs.contains_key(&existing_id)
        {
            return Ok(JobHandle {
                id: existing_id,
                idempotency_key: job.idempotency_key,
                deduplicated: true,
            });
        }

        let id = job.id;
        let key = job.idempotency_key.clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.dedup.insert(key.clone(), id);
        inner.enqueue_seq.insert(id, seq);

        let mut job = job;
        job.status = if job.available_at > Utc::now() {
            JobStatus::Delayed
        } else {
            JobStatus::Waiting
        };
        inner.jobs.insert(id, job);

        Ok(JobHandle {
            id,
            idempotency_key: key,
            deduplicated: false,
        })
    }

    async fn claim_next(&self, names: &[String]) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let mut candidate: Option<(i32, u64, Uuid)> = None;
        for (id, job) in &inner.jobs {
            if !names.contains(&job.name) || !job.is_ready(now) {
                continue;
            }
            let seq = inner.enqueue_seq.get(id).copied().unwrap_or(u64::MAX);
            let rank = (job.priority, seq, *id);
            if candidate.is_none_or(|(p, s, _)| (rank.0, rank.1) < (p, s)) {
                candidate = Some(rank);
            }
        }

        let Some((_, _, id)) = candidate else {
            return Ok(None);
        };

        inner.claimed_at.insert(id, now);
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Active;
        job.attempts += 1;

        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.claimed_at.remove(&id);
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Completed;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.claimed_at.remove(&id);
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Failed;
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, available_at: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.claimed_at.remove(&id);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.enqueue_seq.insert(id, seq);
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Waiting;
        job.available_at = available_at;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let cancellable = inner
            .jobs
            .get(&id)
            .is_some_and(|j| matches!(j.status, JobStatus::Waiting | JobStatus::Delayed));
        if !cancellable {
            return Ok(false);
        }
        if let Some(job) = inner.jobs.remove(&id) {
            inner.dedup.remove(&job.idempotency_key);
        }
        inner.enqueue_seq.remove(&id);
        Ok(true)
    }

    async fn requeue_stuck(&self, older_than_secs: u64) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs as i64);
        let mut inner = self.inner.lock().await;

        let stuck: Vec<Uuid> = inner
            .claimed_at
            .iter()
            .filter(|(_, at)| **at <= cutoff)
            .map(|(id, _)| *id)
            .collect();

        let mut requeued = 0u64;
        for id in stuck {
            inner.claimed_at.remove(&id);
            if let Some(job) = inner.jobs.get_mut(&id)
                && job.status == JobStatus::Active
            {
                job.status = JobStatus::Waiting;
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
