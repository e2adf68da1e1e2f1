use serde::Deserialize;

/// Bounded retry settings for infrastructure-level operations (store
/// connects, poll cycles). Job-level retry is governed by each record's
/// `BackoffPolicy`, not by this.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2,
        }
    }
}
