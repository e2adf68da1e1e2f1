use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ingest::parser::ParsedItem;
use crate::models::envelope::{
    BatchOutcome, ContentGenerateRequest, EmailSendRequest, NotificationEnvelope,
    NotificationMessage,
};

/// Downstream email-send capability, implemented outside this core.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, request: &EmailSendRequest) -> anyhow::Result<()>;
}

/// Downstream content-generation capability, implemented outside this core.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_content(&self, request: &ContentGenerateRequest) -> anyhow::Result<()>;
}

#[derive(Error, Debug)]
pub enum DispatchFailure {
    #[error("unroutable type attribute '{0}'")]
    UnroutableType(String),

    #[error("type attribute '{0}' does not match the message shape")]
    TypeMismatch(String),

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Routes parsed notifications to handler capabilities and collects one
/// outcome per record. Stateless across batches; handler failures are
/// isolated to their record and are NOT retried here — redelivery of the
/// specific failed record is the transport's job.
pub struct Dispatcher {
    email: Arc<dyn EmailSender>,
    content: Arc<dyn ContentGenerator>,
}

impl Dispatcher {
    pub fn new(email: Arc<dyn EmailSender>, content: Arc<dyn ContentGenerator>) -> Self {
        Self { email, content }
    }

    /// Every item in the input yields exactly one outcome. Parse failures
    /// are recorded as failures without invoking any handler.
    pub async fn dispatch_batch(&self, items: Vec<ParsedItem>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for item in items {
            match item.result {
                Ok(envelope) => match self.dispatch_one(&envelope).await {
                    Ok(()) => {
                        info!(record_id = %item.record_id, "Notification dispatched");
                        outcome.record_success(item.record_id);
                    }
                    Err(e) => {
                        warn!(
                            record_id = %item.record_id,
                            error = %e,
                            "Notification dispatch failed, left to transport redelivery"
                        );
                        outcome.record_failure(item.record_id);
                    }
                },
                Err(e) => {
                    warn!(record_id = %item.record_id, error = %e, "Transport record failed parsing");
                    outcome.record_failure(item.record_id);
                }
            }
        }

        outcome
    }

    /// An explicit `type` attribute wins over message shape; a
    /// discriminator contradicting the shape is a failure rather than a
    /// guess.
    async fn dispatch_one(&self, envelope: &NotificationEnvelope) -> Result<(), DispatchFailure> {
        match envelope.attributes.get("type").map(String::as_str) {
            Some("email") => match &envelope.message {
                NotificationMessage::EmailSend(request) => self.send_email(request).await,
                _ => Err(DispatchFailure::TypeMismatch("email".into())),
            },
            Some("content") => match &envelope.message {
                NotificationMessage::ContentGenerate(request) => self.generate(request).await,
                _ => Err(DispatchFailure::TypeMismatch("content".into())),
            },
            Some(other) => Err(DispatchFailure::UnroutableType(other.to_string())),
            None => match &envelope.message {
                NotificationMessage::EmailSend(request) => self.send_email(request).await,
                NotificationMessage::ContentGenerate(request) => self.generate(request).await,
            },
        }
    }

    async fn send_email(&self, request: &EmailSendRequest) -> Result<(), DispatchFailure> {
        self.email
            .send_email(request)
            .await
            .map_err(|e| DispatchFailure::Handler(e.to_string()))
    }

    async fn generate(&self, request: &ContentGenerateRequest) -> Result<(), DispatchFailure> {
        self.content
            .generate_content(request)
            .await
            .map_err(|e| DispatchFailure::Handler(e.to_string()))
    }
}
