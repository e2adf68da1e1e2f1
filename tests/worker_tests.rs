use anyhow::{Result, anyhow};
use chrono::Utc;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use dispatch_service::clients::memory::InMemoryQueueStore;
use dispatch_service::clients::queue::QueueStore;
use dispatch_service::models::health::Liveness;
use dispatch_service::models::job::{BackoffPolicy, EnqueueOptions, JobStatus};
use dispatch_service::models::retry::RetryConfig;
use dispatch_service::producer::{JobProducer, ProducerDefaults};
use dispatch_service::worker::{JobWorker, PollOutcome, WorkerConfig};

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        handler_timeout: Duration::from_millis(200),
        cycle_retry: RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2,
        },
    }
}

fn harness() -> (
    Arc<InMemoryQueueStore>,
    JobProducer<InMemoryQueueStore>,
    JobWorker<InMemoryQueueStore>,
) {
    let store = Arc::new(InMemoryQueueStore::new());
    let producer = JobProducer::new(Arc::clone(&store), ProducerDefaults::default());
    let worker = JobWorker::new(Arc::clone(&store), fast_worker_config(), Liveness::new());
    (store, producer, worker)
}

/// Immediate-retry options so exhaustion tests do not wait on backoff.
fn immediate_retry(max_attempts: u32) -> EnqueueOptions {
    EnqueueOptions::default()
        .with_max_attempts(max_attempts)
        .with_backoff(BackoffPolicy::Fixed { delay_ms: 0 })
}

/// Test: A successful handler completes the job
#[tokio::test]
async fn test_successful_job_completes() -> Result<()> {
    let (store, producer, mut worker) = harness();

    let executed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executed);
    worker.process("send-email", move |_payload| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), EnqueueOptions::default())
        .await?;

    assert_eq!(worker.poll_once().await?, PollOutcome::Completed);
    assert_eq!(executed.load(Ordering::SeqCst), 1);
    assert_eq!(store.status_of(handle.id).await, Some(JobStatus::Completed));
    assert_eq!(worker.poll_once().await?, PollOutcome::Idle);

    Ok(())
}

/// Test: An always-failing handler runs exactly max_attempts times, then
/// the record is failed and never re-claimed
#[tokio::test]
async fn test_retry_exhaustion() -> Result<()> {
    let (store, producer, mut worker) = harness();

    let executed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executed);
    worker.process("send-email", move |_payload| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("downstream unavailable"))
        }
    });

    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), immediate_retry(3))
        .await?;

    assert_eq!(worker.poll_once().await?, PollOutcome::Rescheduled);
    assert_eq!(worker.poll_once().await?, PollOutcome::Rescheduled);
    assert_eq!(worker.poll_once().await?, PollOutcome::Exhausted);

    assert_eq!(executed.load(Ordering::SeqCst), 3);
    assert_eq!(store.status_of(handle.id).await, Some(JobStatus::Failed));

    // Permanently exhausted: nothing left to claim.
    assert_eq!(worker.poll_once().await?, PollOutcome::Idle);
    assert_eq!(executed.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Exponential backoff sets the retry's availability at least
/// base * 2^(n-1) into the future
#[tokio::test]
async fn test_backoff_growth_on_retry() -> Result<()> {
    let (store, producer, mut worker) = harness();

    worker.process("send-email", |_payload| async {
        Err(anyhow!("always fails"))
    });

    let options = EnqueueOptions::default()
        .with_max_attempts(3)
        .with_backoff(BackoffPolicy::Exponential {
            base_delay_ms: 80,
            max_delay_ms: None,
        });
    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), options)
        .await?;

    let before_first = Utc::now();
    assert_eq!(worker.poll_once().await?, PollOutcome::Rescheduled);

    let job = store.get(handle.id).await?.expect("job should exist");
    assert!(
        job.available_at >= before_first + chrono::Duration::milliseconds(80),
        "first retry must wait at least the base delay"
    );

    // Not claimable until the backoff elapses.
    assert_eq!(worker.poll_once().await?, PollOutcome::Idle);

    sleep(Duration::from_millis(120)).await;
    let before_second = Utc::now();
    assert_eq!(worker.poll_once().await?, PollOutcome::Rescheduled);

    let job = store.get(handle.id).await?.expect("job should exist");
    assert!(
        job.available_at >= before_second + chrono::Duration::milliseconds(160),
        "second retry must wait at least twice the base delay"
    );

    Ok(())
}

/// Test: Among ready jobs the lower priority value is claimed first, and
/// equal priorities are FIFO by enqueue order
#[tokio::test]
async fn test_priority_and_fifo_ordering() -> Result<()> {
    let (_store, producer, mut worker) = harness();

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    worker.process("send-email", move |payload| {
        let seen = Arc::clone(&seen);
        async move {
            let tag = payload["tag"].as_str().unwrap_or_default().to_string();
            seen.lock().await.push(tag);
            Ok(())
        }
    });

    producer
        .enqueue(
            "send-email",
            json!({ "tag": "low", "to": "a@b.c" }),
            EnqueueOptions::default().with_priority(5),
        )
        .await?;
    producer
        .enqueue(
            "send-email",
            json!({ "tag": "first", "to": "b@b.c" }),
            EnqueueOptions::default().with_priority(1),
        )
        .await?;
    producer
        .enqueue(
            "send-email",
            json!({ "tag": "second", "to": "c@b.c" }),
            EnqueueOptions::default().with_priority(1),
        )
        .await?;

    for _ in 0..3 {
        assert_eq!(worker.poll_once().await?, PollOutcome::Completed);
    }

    assert_eq!(*order.lock().await, vec!["first", "second", "low"]);

    Ok(())
}

/// Test: A panicking handler is an ordinary failure, not a crash
#[tokio::test]
async fn test_handler_panic_is_contained() -> Result<()> {
    let (store, producer, mut worker) = harness();

    let executed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executed);
    worker.process("send-email", move |_payload| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("handler bug");
            #[allow(unreachable_code)]
            Ok(())
        }
    });

    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), immediate_retry(2))
        .await?;

    assert_eq!(worker.poll_once().await?, PollOutcome::Rescheduled);
    assert_eq!(worker.poll_once().await?, PollOutcome::Exhausted);

    assert_eq!(executed.load(Ordering::SeqCst), 2);
    assert_eq!(store.status_of(handle.id).await, Some(JobStatus::Failed));

    Ok(())
}

/// Test: A handler that overruns its timeout is treated as failed
#[tokio::test]
async fn test_handler_timeout_is_a_failure() -> Result<()> {
    let (store, producer, mut worker) = harness();

    worker.process("send-email", |_payload| async {
        sleep(Duration::from_secs(5)).await;
        Ok(())
    });

    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), immediate_retry(1))
        .await?;

    assert_eq!(worker.poll_once().await?, PollOutcome::Exhausted);
    assert_eq!(store.status_of(handle.id).await, Some(JobStatus::Failed));

    Ok(())
}

/// Test: A delayed job is invisible until its availability time
#[tokio::test]
async fn test_delayed_job_not_claimed_early() -> Result<()> {
    let (_store, producer, mut worker) = harness();

    worker.process("send-email", |_payload| async { Ok(()) });

    producer
        .enqueue(
            "send-email",
            json!({ "to": "x@y.z" }),
            EnqueueOptions::default().with_delay(Duration::from_millis(150)),
        )
        .await?;

    assert_eq!(worker.poll_once().await?, PollOutcome::Idle);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(worker.poll_once().await?, PollOutcome::Completed);

    Ok(())
}

/// Test: Only one of two concurrent claims wins a single ready job
#[tokio::test]
async fn test_claim_race_is_silent() -> Result<()> {
    let (store, producer, _worker) = harness();

    producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), EnqueueOptions::default())
        .await?;

    let names = vec!["send-email".to_string()];
    let (first, second) = tokio::join!(store.claim_next(&names), store.claim_next(&names));

    let claims = [first?, second?];
    let won = claims.iter().filter(|c| c.is_some()).count();
    assert_eq!(won, 1, "exactly one claimer may win");

    Ok(())
}

/// Test: Jobs stuck in the active state are requeued and re-claimable
#[tokio::test]
async fn test_stuck_active_job_is_requeued() -> Result<()> {
    let (store, producer, _worker) = harness();

    let handle = producer
        .enqueue("send-email", json!({ "to": "x@y.z" }), EnqueueOptions::default())
        .await?;

    let names = vec!["send-email".to_string()];
    let claimed = store.claim_next(&names).await?.expect("job should claim");
    assert_eq!(claimed.attempts, 1);

    let requeued = store.requeue_stuck(0).await?;
    assert_eq!(requeued, 1);
    assert_eq!(store.status_of(handle.id).await, Some(JobStatus::Waiting));

    let reclaimed = store.claim_next(&names).await?.expect("job should reclaim");
    assert_eq!(reclaimed.id, handle.id);
    assert_eq!(reclaimed.attempts, 2);

    Ok(())
}

/// Test: Worker liveness reflects successful polls
#[tokio::test]
async fn test_worker_liveness_updates() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let liveness = Liveness::new();
    let mut worker = JobWorker::new(
        Arc::clone(&store),
        fast_worker_config(),
        Arc::clone(&liveness),
    );
    worker.process("send-email", |_payload| async { Ok(()) });

    assert!(liveness.last_worker_poll().is_none());
    worker.poll_once().await?;
    assert!(liveness.last_worker_poll().is_some());

    Ok(())
}
