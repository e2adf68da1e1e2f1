use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::models::envelope::{
    NotificationEnvelope, NotificationMessage, PubSubEnvelope, TransportBatch, TransportRecord,
};

#[derive(Error, Debug)]
pub enum ParseFailure {
    #[error("record body is not valid JSON: {0}")]
    BodyNotJson(String),

    #[error("inner message is not valid JSON: {0}")]
    MessageNotJson(String),

    #[error("message does not match any known schema: {0}")]
    UnknownSchema(String),

    #[error("message failed validation: {0}")]
    Validation(String),
}

/// Outcome of decoding one transport record. The record id is carried on
/// both arms so failures can be reported without re-touching the raw
/// record.
#[derive(Debug)]
pub struct ParsedItem {
    pub record_id: String,
    pub result: Result<NotificationEnvelope, ParseFailure>,
}

/// Decode a transport batch into validated notification envelopes. A
/// record whose body is malformed or whose message fails schema validation
/// yields a failed item for that record only; the rest of the batch always
/// continues.
pub fn parse_batch(batch: &TransportBatch) -> Vec<ParsedItem> {
    batch
        .records
        .iter()
        .map(|record| ParsedItem {
            record_id: record.record_id.clone(),
            result: parse_record(record),
        })
        .collect()
}

fn parse_record(record: &TransportRecord) -> Result<NotificationEnvelope, ParseFailure> {
    let envelope: PubSubEnvelope = serde_json::from_str(&record.body)
        .map_err(|e| ParseFailure::BodyNotJson(e.to_string()))?;

    // The inner Message field is itself a JSON document; plain text is
    // rejected here rather than at routing time.
    let message_value: serde_json::Value = serde_json::from_str(&envelope.message)
        .map_err(|e| ParseFailure::MessageNotJson(e.to_string()))?;

    let message: NotificationMessage = serde_json::from_value(message_value)
        .map_err(|e| ParseFailure::UnknownSchema(e.to_string()))?;

    validate_message(&message)?;

    let attributes: HashMap<String, String> = envelope
        .message_attributes
        .into_iter()
        .map(|(name, attribute)| (name, attribute.value))
        .collect();

    debug!(record_id = %record.record_id, "Transport record parsed");

    Ok(NotificationEnvelope {
        record_id: record.record_id.clone(),
        ack_token: record.ack_token.clone(),
        message,
        attributes,
    })
}

fn validate_message(message: &NotificationMessage) -> Result<(), ParseFailure> {
    match message {
        NotificationMessage::EmailSend(email) => {
            if email.template.trim().is_empty() {
                return Err(ParseFailure::Validation("template must not be empty".into()));
            }
            if email.to.trim().is_empty() {
                return Err(ParseFailure::Validation("to must not be empty".into()));
            }
            if !email.to.contains('@') {
                return Err(ParseFailure::Validation(format!(
                    "'{}' is not a valid recipient address",
                    email.to
                )));
            }
            if email.subject.trim().is_empty() {
                return Err(ParseFailure::Validation("subject must not be empty".into()));
            }
        }
        NotificationMessage::ContentGenerate(content) => {
            if content.amount == 0 {
                return Err(ParseFailure::Validation("amount must be positive".into()));
            }
        }
    }
    Ok(())
}
