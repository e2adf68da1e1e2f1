use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// One record as delivered by the at-least-once transport. `record_id` and
/// `ack_token` are opaque; they are only echoed back when reporting
/// per-item outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRecord {
    pub record_id: String,
    pub ack_token: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportBatch {
    pub records: Vec<TransportRecord>,
}

/// The pub/sub wrapper expected inside a transport record body. `Message`
/// carries the application payload as a JSON string (or plain text, which
/// fails schema validation downstream).
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubEnvelope {
    #[serde(rename = "Message")]
    pub message: String,

    #[serde(rename = "MessageAttributes", default)]
    pub message_attributes: HashMap<String, MessageAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "Type")]
    pub attribute_type: String,

    #[serde(rename = "Value")]
    pub value: String,
}

/// Application message schemas accepted on the ingestion path. Variants are
/// distinguished by shape; an explicit `attributes["type"]` discriminator
/// takes precedence during routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationMessage {
    EmailSend(EmailSendRequest),
    ContentGenerate(ContentGenerateRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSendRequest {
    pub template: String,
    pub to: String,
    pub subject: String,

    #[serde(default)]
    pub props: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentGenerateRequest {
    pub amount: u32,
}

/// A validated inbound notification. Lives only for the duration of one
/// ingestion batch.
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub record_id: String,
    pub ack_token: String,
    pub message: NotificationMessage,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Success,
    Failure,
}

/// Per-record outcomes for one ingestion batch, keyed by transport record
/// id. Every record in the batch appears exactly once.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    outcomes: HashMap<String, ItemOutcome>,
}

impl BatchOutcome {
    pub fn record_success(&mut self, record_id: impl Into<String>) {
        self.outcomes.insert(record_id.into(), ItemOutcome::Success);
    }

    pub fn record_failure(&mut self, record_id: impl Into<String>) {
        self.outcomes.insert(record_id.into(), ItemOutcome::Failure);
    }

    pub fn outcome_for(&self, record_id: &str) -> Option<ItemOutcome> {
        self.outcomes.get(record_id).copied()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Record ids the transport should redeliver. Successful siblings are
    /// acknowledged individually and never reappear.
    pub fn failed_record_ids(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == ItemOutcome::Failure)
            .map(|(id, _)| id.clone())
            .collect();
        failed.sort();
        failed
    }
}

/// Partial-batch failure report returned to the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

impl From<&BatchOutcome> for TransportResponse {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            batch_item_failures: outcome
                .failed_record_ids()
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id,
                })
                .collect(),
        }
    }
}
