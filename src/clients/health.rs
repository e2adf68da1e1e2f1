use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::clients::queue::QueueStore;
use crate::models::health::{HealthCheckResponse, HealthStatus, Liveness, ServiceHealth};

/// Answers the process-health question: is the store reachable, and have
/// the worker and scheduler loops made a successful pass recently.
pub struct HealthChecker {
    store: Arc<dyn QueueStore>,
    liveness: Arc<Liveness>,
    /// A loop silent for longer than this is reported unhealthy.
    max_loop_age_seconds: i64,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        liveness: Arc<Liveness>,
        max_loop_age_seconds: i64,
    ) -> Self {
        Self {
            store,
            liveness,
            max_loop_age_seconds,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("queue_store".to_string(), self.check_store().await);
        checks.insert(
            "worker_loop".to_string(),
            self.check_loop("worker", self.liveness.last_worker_poll()),
        );
        checks.insert(
            "scheduler_loop".to_string(),
            self.check_loop("scheduler", self.liveness.last_scheduler_tick()),
        );

        let status = determine_overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Queue store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Queue store health check failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }

    fn check_loop(
        &self,
        loop_name: &str,
        last_activity: Option<chrono::DateTime<Utc>>,
    ) -> ServiceHealth {
        match last_activity {
            None => ServiceHealth::degraded(format!("{} loop has not completed a pass yet", loop_name)),
            Some(at) => {
                let age = Utc::now().signed_duration_since(at).num_seconds();
                if age > self.max_loop_age_seconds {
                    warn!(loop_name, age_seconds = age, "Loop has gone silent");
                    ServiceHealth::unhealthy(format!(
                        "{} loop silent for {}s (limit {}s)",
                        loop_name, age, self.max_loop_age_seconds
                    ))
                    .with_last_activity(at)
                } else {
                    ServiceHealth::healthy(0).with_last_activity(at)
                }
            }
        }
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
