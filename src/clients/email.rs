use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::ingest::dispatch::EmailSender;
use crate::models::envelope::EmailSendRequest;

/// Minimal "send message" primitive against the external email service.
/// No retries here: on the dispatch path the transport redelivers failed
/// records, and on the job path the worker owns retry.
pub struct EmailClient {
    http_client: Client,
    base_url: String,
}

impl EmailClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(base_url = %config.email_service_url, "Email client initialized");

        Ok(Self {
            http_client,
            base_url: config.email_service_url.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    async fn send_email(&self, request: &EmailSendRequest) -> Result<()> {
        debug!(
            template = %request.template,
            to = %request.to,
            "Sending email"
        );

        let url = format!("{}/api/v1/emails", self.base_url);
        let response = self.http_client.post(&url).json(request).send().await?;

        let status = response.status();
        if status.is_success() {
            info!(template = %request.template, "Email accepted by email service");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!("Email service returned {}: {}", status, error_text))
        }
    }
}
