//! Event-driven shape: one document-write notification in, at most one answer out.

use reactor_core::{Answerer, Document, Outcome, Record, Skip, StoreError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// A Firestore document-write event as delivered to a function trigger.
///
/// `value` is the document after the write; `old_value` is empty on create.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    #[serde(default)]
    pub value: Option<Document>,
    #[serde(default)]
    pub old_value: Option<Document>,
    #[serde(default)]
    pub update_mask: Option<UpdateMask>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMask {
    #[serde(default)]
    pub field_paths: Vec<String>,
}

/// Why an event payload was ignored without touching the store.
#[derive(Debug, Error)]
pub enum Ineligible {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("no value found in event")]
    MissingValue,

    #[error("document name missing from event")]
    MissingName,
}

/// What the handler did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Ignored(String),
    Processed(Outcome),
}

/// Parse an event payload into the record it describes.
///
/// Accepts the bare payload or one wrapped as `{"data": ..., "context": ...}`.
/// Anything that does not decode cleanly is rejected; partial payloads are
/// never acted on.
pub fn decode_payload(bytes: &[u8]) -> Result<Record, Ineligible> {
    let raw: Value =
        serde_json::from_slice(bytes).map_err(|e| Ineligible::Malformed(e.to_string()))?;
    let raw = match raw {
        Value::Object(mut map) if !map.contains_key("value") && map.contains_key("data") => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    };

    let payload: TriggerPayload =
        serde_json::from_value(raw).map_err(|e| Ineligible::Malformed(e.to_string()))?;
    let doc = payload.value.ok_or(Ineligible::MissingValue)?;
    if doc.name.is_empty() {
        // Deletes arrive with an empty `value`.
        return Err(Ineligible::MissingName);
    }
    Ok(Record::from_document(doc))
}

/// Run the answer-fill procedure for one event payload.
///
/// Ineligible payloads complete normally. Only a failed answer write is an
/// error, so the hosting platform can surface it.
pub async fn handle_event(answerer: &Answerer, payload: &[u8]) -> Result<Handled, StoreError> {
    let record = match decode_payload(payload) {
        Ok(record) => record,
        Err(reason) => {
            warn!(%reason, "event ignored");
            return Ok(Handled::Ignored(reason.to_string()));
        }
    };

    let outcome = answerer.fill(&record).await?;
    match &outcome {
        Outcome::Skipped(Skip::AlreadyAnswered) => info!(id = %record.id, "already answered"),
        Outcome::Skipped(Skip::NoQuestion) => info!(id = %record.id, "no question field found"),
        Outcome::Skipped(Skip::QuestionNotText) => {
            warn!(id = %record.id, "question is not a string")
        }
        Outcome::LostRace => info!(id = %record.id, "answered elsewhere first"),
        Outcome::Answered { .. } => info!(id = %record.id, "done"),
    }
    Ok(Handled::Processed(outcome))
}
