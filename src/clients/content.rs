use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::ingest::dispatch::ContentGenerator;
use crate::models::envelope::ContentGenerateRequest;

/// Minimal "enqueue generation" primitive against the external
/// content-generation service.
pub struct ContentClient {
    http_client: Client,
    base_url: String,
}

impl ContentClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(base_url = %config.content_service_url, "Content client initialized");

        Ok(Self {
            http_client,
            base_url: config.content_service_url.clone(),
        })
    }
}

#[async_trait]
impl ContentGenerator for ContentClient {
    async fn generate_content(&self, request: &ContentGenerateRequest) -> Result<()> {
        debug!(amount = request.amount, "Requesting content generation");

        let url = format!("{}/api/v1/generate", self.base_url);
        let response = self.http_client.post(&url).json(request).send().await?;

        let status = response.status();
        if status.is_success() {
            info!(amount = request.amount, "Content generation accepted");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!(
                "Content service returned {}: {}",
                status,
                error_text
            ))
        }
    }
}
