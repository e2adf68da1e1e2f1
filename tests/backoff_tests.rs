use anyhow::{Result, anyhow};
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use dispatch_service::models::job::BackoffPolicy;
use dispatch_service::models::retry::RetryConfig;
use dispatch_service::utils::{apply_jitter, retry_with_backoff};

/// Test: Fixed policy yields a constant delay regardless of attempt count
#[test]
fn test_fixed_backoff_is_constant() {
    let policy = BackoffPolicy::Fixed { delay_ms: 250 };

    assert_eq!(policy.delay_for(1), Duration::from_millis(250));
    assert_eq!(policy.delay_for(4), Duration::from_millis(250));
    assert_eq!(policy.delay_for(100), Duration::from_millis(250));
}

/// Test: Exponential policy doubles per attempt from the base
#[test]
fn test_exponential_backoff_growth() {
    let policy = BackoffPolicy::Exponential {
        base_delay_ms: 100,
        max_delay_ms: None,
    };

    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    assert_eq!(policy.delay_for(4), Duration::from_millis(800));
}

/// Test: Exponential policy respects its cap
#[test]
fn test_exponential_backoff_cap() {
    let policy = BackoffPolicy::Exponential {
        base_delay_ms: 100,
        max_delay_ms: Some(250),
    };

    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    assert_eq!(policy.delay_for(10), Duration::from_millis(250));
}

/// Test: An attempt count of zero is treated as the first attempt
#[test]
fn test_backoff_zero_attempts_clamped() {
    let policy = BackoffPolicy::Exponential {
        base_delay_ms: 100,
        max_delay_ms: None,
    };

    assert_eq!(policy.delay_for(0), policy.delay_for(1));
}

/// Test: Jitter only ever lengthens a delay
#[test]
fn test_jitter_is_strictly_additive() {
    for _ in 0..50 {
        let jittered = apply_jitter(1_000);
        assert!(jittered >= 1_000, "jitter must not shorten the delay");
        assert!(jittered <= 1_100, "jitter must stay within 10%");
    }

    assert_eq!(apply_jitter(0), 0);
}

/// Test: Successful operations complete without retry
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 50,
        max_delay_ms: 500,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("success")
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Transient failures are retried until success
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 5,
        initial_delay_ms: 20,
        max_delay_ms: 200,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            let attempts = counter.fetch_add(1, Ordering::SeqCst);
            if attempts < 2 {
                Err(anyhow!("Transient error"))
            } else {
                Ok("success")
            }
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Permanent failures exhaust the attempt budget exactly
#[tokio::test]
async fn test_permanent_failure_exhausts_retries() {
    let config = RetryConfig {
        max_attempts: 4,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow!("Permanent failure"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
}
