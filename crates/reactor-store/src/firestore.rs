//! Firestore REST v1 client for the watched collection.
//!
//! Answer writes run in a read-write transaction: read the document, give up
//! if `answer` is already set, otherwise commit the update. Firestore holds
//! the document lock between the read and the commit, so of two concurrent
//! writers exactly one commits and the other re-reads the winner's answer.
//!
//! The change feed is a polling listener: the collection is listed on an
//! interval and diffed against the previous listing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reactor_auth::TokenSource;
use reactor_core::record::{ANSWER_FIELD, STATUS_FIELD, TIMESTAMP_FIELD};
use reactor_core::{
    AnswerUpdate, ChangeFeed, Document, DocumentStore, FEED_CAPACITY, Fields, FillOutcome,
    ReactorConfig, Record, StoreError, Subscription,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::snapshot::Snapshot;

pub const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

const PAGE_SIZE: u32 = 300;
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    config: ReactorConfig,
    tokens: Arc<dyn TokenSource>,
    poll_interval: Duration,
}

// ── Wire types ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    /// Decoded one by one so a single odd document cannot fail the page.
    #[serde(default)]
    documents: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

#[derive(Serialize)]
struct TransactionRequest<'a> {
    transaction: &'a str,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    writes: Vec<Write>,
    transaction: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Write {
    update: Document,
    update_mask: DocumentMask,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    update_transforms: Vec<FieldTransform>,
    current_document: Precondition,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentMask {
    field_paths: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldTransform {
    field_path: &'static str,
    set_to_server_value: &'static str,
}

#[derive(Serialize)]
struct Precondition {
    exists: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl FirestoreStore {
    pub fn new(config: ReactorConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: FIRESTORE_BASE_URL.to_string(),
            config,
            tokens,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use another endpoint, e.g. the emulator at `http://localhost:8080/v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Intervals below 10 ms, including zero, are raised to 10 ms.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Bound every request; without this, requests may wait indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, StoreError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(self)
    }

    fn documents_url(&self) -> String {
        format!("{}/{}", self.base_url, self.config.documents_path())
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.documents_url(), self.config.collection)
    }

    /// The id is pushed as one percent-encoded path segment.
    fn document_url(&self, id: &str) -> Result<reqwest::Url, StoreError> {
        let mut url = reqwest::Url::parse(&self.collection_url())
            .map_err(|e| StoreError::Transport(Box::new(e)))?;
        url.path_segments_mut()
            .map_err(|()| {
                StoreError::Transport(format!("not a hierarchical URL: {}", self.base_url).into())
            })?
            .push(id);
        Ok(url)
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        self.tokens
            .token()
            .await
            .map_err(|e| StoreError::Auth(Box::new(e)))
    }

    /// Point read; `None` if the document does not exist.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        self.read(id, None).await
    }

    async fn read(
        &self,
        id: &str,
        transaction: Option<&str>,
    ) -> Result<Option<Record>, StoreError> {
        let mut req = self
            .client
            .get(self.document_url(id)?)
            .bearer_auth(self.bearer().await?);
        if let Some(tx) = transaction {
            req = req.query(&[("transaction", tx)]);
        }
        let resp = req.send().await.map_err(transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: Document = read_json(check(resp).await?).await?;
        Ok(Some(Record::from_document(doc)))
    }

    /// Every document in the collection, following page tokens.
    pub async fn list(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(self.collection_url())
                .bearer_auth(self.bearer().await?)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let resp = req.send().await.map_err(transport)?;
            let page: ListResponse = read_json(check(resp).await?).await?;
            for raw in page.documents {
                let name = raw
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match serde_json::from_value::<Document>(raw) {
                    Ok(doc) => records.push(Record::from_document(doc)),
                    Err(e) => warn!(%name, error = %e, "skipping undecodable document"),
                }
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(records)
    }

    async fn begin_transaction(&self) -> Result<String, StoreError> {
        let resp = self
            .client
            .post(format!("{}:beginTransaction", self.documents_url()))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(transport)?;
        let begun: BeginTransactionResponse = read_json(check(resp).await?).await?;
        Ok(begun.transaction)
    }

    async fn commit(
        &self,
        transaction: &str,
        id: &str,
        update: &AnswerUpdate,
    ) -> Result<(), StoreError> {
        let body = CommitRequest {
            writes: vec![answer_write(&self.config.document_name(id), update)],
            transaction,
        };
        let resp = self
            .client
            .post(format!("{}:commit", self.documents_url()))
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    /// Best effort; the server expires abandoned transactions anyway.
    async fn rollback(&self, transaction: &str) {
        let result = async {
            let resp = self
                .client
                .post(format!("{}:rollback", self.documents_url()))
                .bearer_auth(self.bearer().await?)
                .json(&TransactionRequest { transaction })
                .send()
                .await
                .map_err(transport)?;
            check(resp).await.map(|_| ())
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "transaction rollback failed");
        }
    }

    /// One transaction attempt. `Ok(None)` means the commit was aborted by contention.
    async fn try_fill(
        &self,
        id: &str,
        update: &AnswerUpdate,
    ) -> Result<Option<FillOutcome>, StoreError> {
        let tx = self.begin_transaction().await?;

        let current = match self.read(id, Some(tx.as_str())).await {
            Ok(current) => current,
            Err(e) => {
                self.rollback(&tx).await;
                return Err(e);
            }
        };
        let Some(current) = current else {
            self.rollback(&tx).await;
            return Err(StoreError::NotFound(id.to_string()));
        };
        if current.has_answer() {
            self.rollback(&tx).await;
            return Ok(Some(FillOutcome::AlreadyAnswered));
        }

        match self.commit(&tx, id, update).await {
            Ok(()) => Ok(Some(FillOutcome::Written)),
            Err(StoreError::Server { status: 409, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Update `answer` and `status` on an existing document, optionally stamping `timestamp`.
fn answer_write(name: &str, update: &AnswerUpdate) -> Write {
    let mut fields = Fields::new();
    fields.insert(ANSWER_FIELD.to_string(), update.answer.clone().into());
    fields.insert(STATUS_FIELD.to_string(), update.status.clone().into());

    let update_transforms = if update.stamp_server_time {
        vec![FieldTransform {
            field_path: TIMESTAMP_FIELD,
            set_to_server_value: "REQUEST_TIME",
        }]
    } else {
        Vec::new()
    };

    Write {
        update: Document {
            name: name.to_string(),
            fields,
            ..Default::default()
        },
        update_mask: DocumentMask {
            field_paths: vec![ANSWER_FIELD, STATUS_FIELD],
        },
        update_transforms,
        current_document: Precondition { exists: true },
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(Box::new(e))
}

/// Decode a JSON body, keeping serde's message with its line and column.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
    let body = resp.text().await.map_err(transport)?;
    serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Pass successful responses through; turn the rest into [`StoreError::Server`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Server {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if parsed.error.status.is_empty() => parsed.error.message,
        Ok(parsed) => format!("{}: {}", parsed.error.status, parsed.error.message),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn fill_answer(
        &self,
        id: &str,
        update: &AnswerUpdate,
    ) -> Result<FillOutcome, StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            if let Some(outcome) = self.try_fill(id, update).await? {
                debug!(id, attempt, ?outcome, "answer transaction finished");
                return Ok(outcome);
            }
            warn!(id, attempt, "answer transaction aborted, retrying");
        }
        Err(StoreError::Contention(MAX_TRANSACTION_ATTEMPTS))
    }
}

#[async_trait]
impl ChangeFeed for FirestoreStore {
    /// The first listing is taken before returning, so an unreachable
    /// database fails the subscription instead of the background task.
    /// The poller waits while the consumer is [`FEED_CAPACITY`] events behind.
    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let mut snapshot = Snapshot::default();
        let initial = snapshot.apply(self.list().await?);
        info!(
            collection = %self.config.collection,
            documents = snapshot.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "listening for changes"
        );

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let poller = self.clone();
        let handle = tokio::spawn(async move {
            for event in initial {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let mut interval = tokio::time::interval(poller.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial listing already covered it.
            interval.tick().await;
            loop {
                interval.tick().await;
                match poller.list().await {
                    Ok(records) => {
                        for event in snapshot.apply(records) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "poll failed, retrying on next tick"),
                }
            }
        });

        Ok(Subscription::new(rx, Some(handle)))
    }
}
