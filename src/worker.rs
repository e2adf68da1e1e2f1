use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::clients::queue::QueueStore;
use crate::models::health::Liveness;
use crate::models::job::Job;
use crate::models::retry::RetryConfig;
use crate::utils::{apply_jitter, retry_with_backoff};

type Handler = Arc<dyn Fn(JsonValue) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep between polls that found no ready job.
    pub poll_interval: Duration,
    /// Upper bound on one handler execution; exceeding it is a failure.
    pub handler_timeout: Duration,
    /// Bounded retry applied to a poll cycle that cannot reach the store.
    pub cycle_retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            handler_timeout: Duration::from_secs(30),
            cycle_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No ready job was available.
    Idle,
    Completed,
    /// Handler failed; the job was rescheduled for another attempt.
    Rescheduled,
    /// Handler failed on its final allowed attempt; the job is failed for
    /// good.
    Exhausted,
}

/// Claims ready jobs from the store and drives each through the retry
/// state machine. Handlers are registered per job name; several worker
/// instances may poll the same store concurrently, relying on the store's
/// atomic claim.
pub struct JobWorker<S: QueueStore> {
    store: Arc<S>,
    config: WorkerConfig,
    handlers: HashMap<String, Handler>,
    liveness: Arc<Liveness>,
}

impl<S: QueueStore> JobWorker<S> {
    pub fn new(store: Arc<S>, config: WorkerConfig, liveness: Arc<Liveness>) -> Self {
        Self {
            store,
            config,
            handlers: HashMap::new(),
            liveness,
        }
    }

    /// Register a handler for a job name. The handler reports failure by
    /// returning an error; panics and timeouts are treated the same way.
    pub fn process<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |payload| Box::pin(handler(payload))));
    }

    pub fn job_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Run forever. Store-level failures retry the cycle with backoff and
    /// then pause; they never take the process down.
    pub async fn run(&self) {
        let names = self.job_names();
        info!(job_names = ?names, "Worker loop started");

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Idle) => sleep(self.config.poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Poll cycle failed after bounded retries, pausing");
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// One poll cycle: claim at most one ready job and execute it. Exposed
    /// so tests can drive the loop deterministically.
    pub async fn poll_once(&self) -> anyhow::Result<PollOutcome> {
        let names = self.job_names();

        let claimed = retry_with_backoff(&self.config.cycle_retry, || {
            let names = names.clone();
            let store = Arc::clone(&self.store);
            async move { store.claim_next(&names).await }
        })
        .await?;

        self.liveness.touch_worker();

        let Some(job) = claimed else {
            return Ok(PollOutcome::Idle);
        };

        Ok(self.execute(job).await?)
    }

    async fn execute(&self, job: Job) -> anyhow::Result<PollOutcome> {
        let Some(handler) = self.handlers.get(&job.name) else {
            // Claimed a name nothing here handles; treat as a failure so the
            // record is not lost silently.
            warn!(job_id = %job.id, job_name = %job.name, "No handler registered for claimed job");
            return self.handle_failure(&job, "no handler registered").await;
        };

        debug!(
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Executing job"
        );

        let fut = handler(job.payload.clone());
        // The handler runs in its own task so a panic unwinds there and
        // surfaces as a JoinError instead of tearing down the worker.
        let execution = timeout(self.config.handler_timeout, tokio::spawn(fut)).await;

        let failure_reason = match execution {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(format!("handler error: {e}")),
            Ok(Err(join_err)) => Some(format!("handler panicked: {join_err}")),
            Err(_) => Some(format!(
                "handler timed out after {:?}",
                self.config.handler_timeout
            )),
        };

        match failure_reason {
            None => {
                self.store.mark_completed(job.id).await?;
                info!(job_id = %job.id, job_name = %job.name, "Job completed");
                Ok(PollOutcome::Completed)
            }
            Some(reason) => self.handle_failure(&job, &reason).await,
        }
    }

    /// The single authority on retry decisions. `attempts` was already
    /// incremented by the claim, so exhaustion is a plain comparison.
    async fn handle_failure(&self, job: &Job, reason: &str) -> anyhow::Result<PollOutcome> {
        if job.attempts < job.max_attempts {
            let delay_ms = apply_jitter(job.backoff.delay_for(job.attempts).as_millis() as u64);
            let available_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);

            self.store.reschedule(job.id, available_at).await?;

            warn!(
                job_id = %job.id,
                job_name = %job.name,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay_ms,
                reason,
                "Job failed, scheduled for retry"
            );
            Ok(PollOutcome::Rescheduled)
        } else {
            self.store.mark_failed(job.id).await?;

            // Operator-visible terminal failure; this record is exhausted
            // and will never be re-enqueued automatically.
            error!(
                job_id = %job.id,
                job_name = %job.name,
                idempotency_key = %job.idempotency_key,
                attempts = job.attempts,
                reason,
                "Job failed permanently after exhausting retries"
            );
            Ok(PollOutcome::Exhausted)
        }
    }
}
