use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::clients::queue::QueueStore;
use crate::models::health::Liveness;
use crate::models::job::EnqueueOptions;
use crate::producer::JobProducer;

/// How often a recurring template fires: a fixed interval or a cron
/// expression (seconds-resolution, `cron` crate syntax).
#[derive(Debug, Clone)]
pub enum Cadence {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Cadence {
    pub fn every(interval: Duration) -> Self {
        Cadence::Every(interval)
    }

    pub fn cron(expression: &str) -> Result<Self, cron::error::Error> {
        Ok(Cadence::Cron(Box::new(cron::Schedule::from_str(
            expression,
        )?)))
    }

    fn first_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Every(interval) => {
                now + chrono::Duration::from_std(*interval).unwrap_or_else(|_| chrono::Duration::zero())
            }
            Cadence::Cron(schedule) => schedule
                .after(&now)
                .next()
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Next fire after one at `prev`. Missed boundaries are skipped, never
    /// caught up: when the previous schedule has fallen behind `now`, the
    /// next fire is computed from `now`.
    fn next_fire(&self, prev: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Every(interval) => {
                let step = chrono::Duration::from_std(*interval)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let next = prev + step;
                if next <= now { now + step } else { next }
            }
            Cadence::Cron(schedule) => schedule
                .after(&now)
                .next()
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

struct RecurringTemplate {
    name: String,
    payload: JsonValue,
    cadence: Cadence,
    next_fire: DateTime<Utc>,
}

/// A fire owed by one template at one tick boundary.
#[derive(Debug, Clone)]
pub struct DueFire {
    pub name: String,
    pub payload: JsonValue,
    pub fire_time: DateTime<Utc>,
}

/// Registers recurring job templates and re-enqueues each through the
/// producer on its cadence. Scheduler state (next-fire times) is
/// process-wide; an individual enqueue failure never halts future ticks.
///
/// Missed-tick policy: no catch-up. A process that was down across several
/// boundaries fires each template at most once on resume.
pub struct Scheduler<S: QueueStore> {
    producer: Arc<JobProducer<S>>,
    store: Arc<S>,
    templates: Vec<RecurringTemplate>,
    tick_interval: Duration,
    stuck_active_timeout_secs: u64,
    liveness: Arc<Liveness>,
}

impl<S: QueueStore> Scheduler<S> {
    pub fn new(
        producer: Arc<JobProducer<S>>,
        store: Arc<S>,
        tick_interval: Duration,
        stuck_active_timeout_secs: u64,
        liveness: Arc<Liveness>,
    ) -> Self {
        Self {
            producer,
            store,
            templates: Vec::new(),
            tick_interval,
            stuck_active_timeout_secs,
            liveness,
        }
    }

    pub fn register_recurring(&mut self, name: impl Into<String>, payload: JsonValue, cadence: Cadence) {
        let name = name.into();
        let next_fire = cadence.first_fire(Utc::now());
        info!(job_name = %name, next_fire = %next_fire, "Recurring job registered");
        self.templates.push(RecurringTemplate {
            name,
            payload,
            cadence,
            next_fire,
        });
    }

    /// Collect every template due at `now`, advancing its next-fire time.
    /// At most one fire per template per call. Exposed so tests can walk a
    /// simulated clock.
    pub fn collect_due(&mut self, now: DateTime<Utc>) -> Vec<DueFire> {
        let mut due = Vec::new();
        for template in &mut self.templates {
            if template.next_fire > now {
                continue;
            }
            due.push(DueFire {
                name: template.name.clone(),
                payload: template.payload.clone(),
                fire_time: template.next_fire,
            });
            template.next_fire = template.cadence.next_fire(template.next_fire, now);
        }
        due
    }

    /// One scheduler pass at `now`: enqueue every due fire (exactly once
    /// per template) and requeue jobs stuck in the active state.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        for fire in self.collect_due(now) {
            let payload = stamp_fire_time(fire.payload, fire.fire_time);
            match self
                .producer
                .enqueue(&fire.name, payload, EnqueueOptions::default())
                .await
            {
                Ok(handle) => {
                    debug!(
                        job_name = %fire.name,
                        job_id = %handle.id,
                        fire_time = %fire.fire_time,
                        deduplicated = handle.deduplicated,
                        "Recurring job enqueued"
                    );
                }
                Err(e) => {
                    // This tick is lost for this template; the next one
                    // still fires.
                    error!(job_name = %fire.name, error = %e, "Recurring enqueue failed");
                }
            }
        }

        match self.store.requeue_stuck(self.stuck_active_timeout_secs).await {
            Ok(count) if count > 0 => info!(count, "Requeued stuck active jobs"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Stuck-job maintenance failed"),
        }

        self.liveness.touch_scheduler();
    }

    pub async fn run(mut self) {
        info!(
            templates = self.templates.len(),
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Scheduler loop started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }
}

/// The tick boundary is part of the job's identity: stamping it into the
/// payload makes the content-hash idempotency key unique per tick, while a
/// duplicate fire of the same tick still dedups to one record.
fn stamp_fire_time(payload: JsonValue, fire_time: DateTime<Utc>) -> JsonValue {
    let stamp = JsonValue::String(fire_time.to_rfc3339_opts(SecondsFormat::Millis, true));
    match payload {
        JsonValue::Object(mut map) => {
            map.insert("scheduled_for".to_string(), stamp);
            JsonValue::Object(map)
        }
        other => serde_json::json!({ "data": other, "scheduled_for": stamp }),
    }
}
