pub mod dispatch;
pub mod parser;

pub use dispatch::{ContentGenerator, DispatchFailure, Dispatcher, EmailSender};
pub use parser::{ParseFailure, ParsedItem, parse_batch};

use crate::models::envelope::{TransportBatch, TransportResponse};

/// Full ingestion pass for one transport batch: parse every record,
/// dispatch the valid ones, and report only the failed record ids so the
/// transport redelivers exactly those.
pub async fn process_batch(dispatcher: &Dispatcher, batch: &TransportBatch) -> TransportResponse {
    let items = parse_batch(batch);
    let outcome = dispatcher.dispatch_batch(items).await;
    TransportResponse::from(&outcome)
}
