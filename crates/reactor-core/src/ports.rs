//! Seams to the two managed services.
//!
//! Clients are built once at startup and handed to the [`Answerer`](crate::Answerer)
//! as `Arc<dyn ...>`, so tests can substitute in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{GenerateError, StoreError};
use crate::record::{AnswerUpdate, ChangeEvent, FillOutcome};

/// Events a feed may queue ahead of its consumer before the producer waits.
pub const FEED_CAPACITY: usize = 64;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write `update` onto record `id` only if it has no `answer` yet.
    ///
    /// The check and the write are one atomic step at the store, so two
    /// concurrent callers cannot both write.
    async fn fill_answer(&self, id: &str, update: &AnswerUpdate)
    -> Result<FillOutcome, StoreError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start delivering change events for the watched collection.
    async fn subscribe(&self) -> Result<Subscription, StoreError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// A live change-feed subscription.
///
/// Events are produced by the store client on its own task and queued on a
/// bounded channel, so a slow consumer holds the producer back. Dropping the
/// subscription stops that task.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::Receiver<ChangeEvent>,
        producer: Option<JoinHandle<()>>,
    ) -> Self {
        Self { events, producer }
    }

    /// Next event, or `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}
