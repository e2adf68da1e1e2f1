use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            last_activity: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            last_activity: None,
            error: Some(error),
        }
    }

    pub fn degraded(error: String) -> Self {
        Self {
            status: HealthStatus::Degraded,
            response_time_ms: None,
            last_activity: None,
            error: Some(error),
        }
    }

    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }
}

/// Shared liveness handle written by the worker and scheduler loops and
/// read by the health endpoint. Stores the millisecond timestamp of each
/// loop's last successful pass; zero means the loop has not run yet.
#[derive(Debug, Default)]
pub struct Liveness {
    last_worker_poll_ms: AtomicI64,
    last_scheduler_tick_ms: AtomicI64,
}

impl Liveness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn touch_worker(&self) {
        self.last_worker_poll_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn touch_scheduler(&self) {
        self.last_scheduler_tick_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_worker_poll(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_worker_poll_ms.load(Ordering::Relaxed))
    }

    pub fn last_scheduler_tick(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_scheduler_tick_ms.load(Ordering::Relaxed))
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}
