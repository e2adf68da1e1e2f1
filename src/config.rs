use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;
use std::time::Duration;

use crate::models::retry::RetryConfig;
use crate::producer::ProducerDefaults;
use crate::worker::WorkerConfig;

fn default_priority() -> i32 {
    0
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub broker_url: String,
    pub queue_namespace: String,
    pub dedup_ttl_seconds: u64,
    pub retention_seconds: u64,

    pub poll_interval_ms: u64,
    pub handler_timeout_seconds: u64,
    pub worker_concurrency: usize,
    pub stuck_active_timeout_seconds: u64,
    pub scheduler_tick_ms: u64,

    pub default_max_attempts: u32,
    pub default_backoff_base_ms: u64,
    pub default_backoff_cap_ms: u64,
    #[serde(default = "default_priority")]
    pub default_priority: i32,

    pub cycle_max_retry_attempts: u32,
    pub cycle_initial_retry_delay_ms: u64,
    pub cycle_max_retry_delay_ms: u64,
    pub cycle_retry_backoff_multiplier: u64,

    pub email_service_url: String,
    pub content_service_url: String,

    pub max_loop_age_seconds: i64,
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        Ok(config)
    }

    pub fn cycle_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.cycle_max_retry_attempts,
            initial_delay_ms: self.cycle_initial_retry_delay_ms,
            max_delay_ms: self.cycle_max_retry_delay_ms,
            backoff_multiplier: self.cycle_retry_backoff_multiplier,
        }
    }

    pub fn producer_defaults(&self) -> ProducerDefaults {
        ProducerDefaults {
            max_attempts: self.default_max_attempts,
            backoff: crate::models::job::BackoffPolicy::Exponential {
                base_delay_ms: self.default_backoff_base_ms,
                max_delay_ms: Some(self.default_backoff_cap_ms),
            },
            priority: self.default_priority,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
            cycle_retry: self.cycle_retry_config(),
        }
    }
}
