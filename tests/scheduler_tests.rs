use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use dispatch_service::clients::memory::InMemoryQueueStore;
use dispatch_service::models::health::Liveness;
use dispatch_service::producer::{JobProducer, ProducerDefaults};
use dispatch_service::scheduler::{Cadence, Scheduler};

fn scheduler(
    store: Arc<InMemoryQueueStore>,
) -> Scheduler<InMemoryQueueStore> {
    let producer = Arc::new(JobProducer::new(
        Arc::clone(&store),
        ProducerDefaults::default(),
    ));
    Scheduler::new(
        producer,
        store,
        Duration::from_millis(100),
        300,
        Liveness::new(),
    )
}

/// Test: A one-minute cadence fires exactly once per boundary across a
/// simulated five-minute window
#[tokio::test]
async fn test_fixed_cadence_fires_once_per_boundary() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    let registered_at = Utc::now();
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::every(Duration::from_secs(60)),
    );

    for minute in 1..=5 {
        let now = registered_at + ChronoDuration::seconds(60 * minute + 1);
        scheduler.tick(now).await;
    }

    assert_eq!(
        store.live_count().await,
        5,
        "one enqueue per minute boundary, no duplicates, no skips"
    );

    Ok(())
}

/// Test: Re-ticking the same boundary does not fire twice
#[tokio::test]
async fn test_no_duplicate_fire_within_a_boundary() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    let registered_at = Utc::now();
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::every(Duration::from_secs(60)),
    );

    let now = registered_at + ChronoDuration::seconds(61);
    scheduler.tick(now).await;
    scheduler.tick(now).await;
    scheduler.tick(now + ChronoDuration::seconds(5)).await;

    assert_eq!(store.live_count().await, 1);

    Ok(())
}

/// Test: Boundaries missed while the process was down are skipped, not
/// caught up
#[tokio::test]
async fn test_missed_ticks_are_not_caught_up() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    let registered_at = Utc::now();
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::every(Duration::from_secs(60)),
    );

    // Ten minutes pass in one jump; only a single fire is owed.
    let resumed = registered_at + ChronoDuration::seconds(600);
    scheduler.tick(resumed).await;
    assert_eq!(store.live_count().await, 1);

    // The next boundary counts from the resume, not from the backlog.
    scheduler.tick(resumed + ChronoDuration::seconds(30)).await;
    assert_eq!(store.live_count().await, 1);

    scheduler.tick(resumed + ChronoDuration::seconds(61)).await;
    assert_eq!(store.live_count().await, 2);

    Ok(())
}

/// Test: Each fire carries a distinct tick stamp, so equal templates on
/// different boundaries never dedup into one record
#[tokio::test]
async fn test_fires_have_distinct_identities() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    let registered_at = Utc::now();
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::every(Duration::from_secs(60)),
    );

    scheduler.tick(registered_at + ChronoDuration::seconds(61)).await;
    scheduler.tick(registered_at + ChronoDuration::seconds(121)).await;

    assert_eq!(store.live_count().await, 2);

    Ok(())
}

/// Test: One failing template never halts sibling templates or later ticks
#[tokio::test]
async fn test_sibling_templates_are_isolated() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    let registered_at = Utc::now();
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::every(Duration::from_secs(60)),
    );
    scheduler.register_recurring(
        "send-email",
        json!({ "to": "digest@example.com", "template": "digest", "subject": "Daily digest" }),
        Cadence::every(Duration::from_secs(60)),
    );

    scheduler.tick(registered_at + ChronoDuration::seconds(61)).await;
    assert_eq!(store.live_count().await, 2);

    scheduler.tick(registered_at + ChronoDuration::seconds(121)).await;
    assert_eq!(store.live_count().await, 4);

    Ok(())
}

/// Test: A cron cadence computes its boundaries from the expression
#[tokio::test]
async fn test_cron_cadence_fires_on_schedule() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let mut scheduler = scheduler(Arc::clone(&store));

    // Top of every minute.
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 5 }),
        Cadence::cron("0 * * * * *")?,
    );

    // Two minutes from now covers at least one and at most two boundaries.
    let fires = scheduler.collect_due(Utc::now() + ChronoDuration::seconds(120));
    assert_eq!(fires.len(), 1, "at most one fire per template per pass");

    Ok(())
}

/// Test: An invalid cron expression is rejected at registration time
#[test]
fn test_invalid_cron_expression_is_rejected() {
    assert!(Cadence::cron("not a cron line").is_err());
}

/// Test: Scheduler liveness reflects completed ticks
#[tokio::test]
async fn test_scheduler_liveness_updates() -> Result<()> {
    let store = Arc::new(InMemoryQueueStore::new());
    let producer = Arc::new(JobProducer::new(
        Arc::clone(&store),
        ProducerDefaults::default(),
    ));
    let liveness = Liveness::new();
    let mut scheduler = Scheduler::new(
        producer,
        store,
        Duration::from_millis(100),
        300,
        Arc::clone(&liveness),
    );

    assert!(liveness.last_scheduler_tick().is_none());
    scheduler.tick(Utc::now()).await;
    assert!(liveness.last_scheduler_tick().is_some());

    Ok(())
}
