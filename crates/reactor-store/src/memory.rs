//! In-process document store with the same answer-write and feed semantics as Firestore.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use reactor_core::record::{ANSWER_FIELD, STATUS_FIELD, TIMESTAMP_FIELD};
use reactor_core::{
    AnswerUpdate, ChangeEvent, ChangeFeed, ChangeKind, DocumentStore, FieldValue, Fields,
    FEED_CAPACITY, FillOutcome, Record, StoreError, Subscription,
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    subscribers: Vec<mpsc::UnboundedSender<ChangeEvent>>,
    next_id: u64,
    writes: usize,
}

impl Inner {
    fn publish(&mut self, kind: ChangeKind, record: &Record) {
        self.subscribers.retain(|tx| {
            tx.send(ChangeEvent {
                kind,
                record: record.clone(),
            })
            .is_ok()
        });
    }
}

/// A collection held in memory.
///
/// Subscribers first receive every existing record as `Added`, then live
/// inserts (`Added`) and answer writes (`Modified`). Writers never wait on a
/// slow subscriber: events are staged per subscriber and a forwarding task
/// feeds them into the bounded subscription channel.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a document with a generated id and return the id.
    pub fn insert(&self, fields: Fields) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("doc-{:06}", inner.next_id);
        let stamp = now();
        let record = Record {
            id: id.clone(),
            fields,
            create_time: Some(stamp.clone()),
            update_time: Some(stamp),
        };
        inner.records.insert(id.clone(), record.clone());
        inner.publish(ChangeKind::Added, &record);
        id
    }

    /// Store `record` under its own id, replacing any previous version.
    pub fn put(&self, mut record: Record) {
        let mut inner = self.lock();
        let stamp = now();
        let created = inner.records.get(&record.id).and_then(|r| r.create_time.clone());
        record.create_time = created.or_else(|| Some(stamp.clone()));
        record.update_time = Some(stamp);
        let kind = match inner.records.insert(record.id.clone(), record.clone()) {
            Some(_) => ChangeKind::Modified,
            None => ChangeKind::Added,
        };
        inner.publish(kind, &record);
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.lock().records.get(id).cloned()
    }

    /// Number of answer writes applied so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fill_answer(
        &self,
        id: &str,
        update: &AnswerUpdate,
    ) -> Result<FillOutcome, StoreError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if record.has_answer() {
            debug!(id, "answer already present, write skipped");
            return Ok(FillOutcome::AlreadyAnswered);
        }

        let stamp = now();
        record
            .fields
            .insert(ANSWER_FIELD.to_string(), update.answer.clone().into());
        record
            .fields
            .insert(STATUS_FIELD.to_string(), update.status.clone().into());
        if update.stamp_server_time {
            record
                .fields
                .insert(TIMESTAMP_FIELD.to_string(), FieldValue::Timestamp(stamp.clone()));
        }
        record.update_time = Some(stamp);
        let record = record.clone();

        inner.writes += 1;
        inner.publish(ChangeKind::Modified, &record);
        Ok(FillOutcome::Written)
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let (staged_tx, mut staged_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.lock();
            for record in inner.records.values() {
                // Receiver is alive: we hold it.
                let _ = staged_tx.send(ChangeEvent::added(record.clone()));
            }
            inner.subscribers.push(staged_tx);
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = staged_rx.recv().await {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(Subscription::new(rx, Some(forwarder)))
    }
}
