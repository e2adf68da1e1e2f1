use anyhow::{Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dispatch_service::api::{AppState, run_api_server};
use dispatch_service::clients::content::ContentClient;
use dispatch_service::clients::email::EmailClient;
use dispatch_service::clients::health::HealthChecker;
use dispatch_service::clients::queue::QueueStore;
use dispatch_service::clients::redis_queue::RedisQueueStore;
use dispatch_service::config::Config;
use dispatch_service::ingest::{ContentGenerator, Dispatcher, EmailSender};
use dispatch_service::models::envelope::{ContentGenerateRequest, EmailSendRequest};
use dispatch_service::models::health::Liveness;
use dispatch_service::producer::JobProducer;
use dispatch_service::scheduler::{Cadence, Scheduler};
use dispatch_service::utils::retry_with_backoff;
use dispatch_service::worker::JobWorker;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load()?;

    let store = retry_with_backoff(&config.cycle_retry_config(), || {
        RedisQueueStore::connect(&config)
    })
    .await?;
    let store = Arc::new(store);

    let liveness = Liveness::new();
    let producer = Arc::new(JobProducer::new(
        Arc::clone(&store),
        config.producer_defaults(),
    ));

    let email = Arc::new(EmailClient::new(&config)?);
    let content = Arc::new(ContentClient::new(&config)?);

    let mut worker = JobWorker::new(
        Arc::clone(&store),
        config.worker_config(),
        Arc::clone(&liveness),
    );

    let email_handler = Arc::clone(&email);
    worker.process("send-email", move |payload| {
        let email = Arc::clone(&email_handler);
        async move {
            let request: EmailSendRequest = serde_json::from_value(payload)?;
            email.send_email(&request).await
        }
    });

    let content_handler = Arc::clone(&content);
    worker.process("generate-content", move |payload| {
        let content = Arc::clone(&content_handler);
        async move {
            let request: ContentGenerateRequest = serde_json::from_value(payload)?;
            content.generate_content(&request).await
        }
    });

    let worker = Arc::new(worker);
    for _ in 0..config.worker_concurrency.max(1) {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await });
    }

    let mut scheduler = Scheduler::new(
        Arc::clone(&producer),
        Arc::clone(&store),
        Duration::from_millis(config.scheduler_tick_ms),
        config.stuck_active_timeout_seconds,
        Arc::clone(&liveness),
    );
    scheduler.register_recurring(
        "generate-content",
        json!({ "amount": 10 }),
        Cadence::cron("0 0 * * * *")?,
    );
    tokio::spawn(scheduler.run());

    let dispatcher = Dispatcher::new(
        Arc::clone(&email) as Arc<dyn EmailSender>,
        Arc::clone(&content) as Arc<dyn ContentGenerator>,
    );
    let health_checker = HealthChecker::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::clone(&liveness),
        config.max_loop_age_seconds,
    );

    info!(
        worker_concurrency = config.worker_concurrency,
        "dispatch-service started"
    );

    let state = Arc::new(AppState {
        health_checker,
        dispatcher,
    });
    run_api_server(state, config.server_port)
        .await
        .map_err(|e| anyhow::anyhow!("API server failed: {e}"))?;

    Ok(())
}
