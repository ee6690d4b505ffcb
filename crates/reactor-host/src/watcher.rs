//! Long-running shape: answer every question inserted into the watched collection.

use std::future::Future;

use reactor_core::{Answerer, ChangeEvent, ChangeFeed, ChangeKind, Outcome, StoreError};
use tracing::{debug, error, info, warn};

/// Tally of what the watcher did, reported when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    /// Insert events seen.
    pub added: u64,
    pub answered: u64,
    /// Answers that carry a model error instead of model output.
    pub generation_failures: u64,
    pub skipped: u64,
    pub lost_races: u64,
    /// Events whose answer could not be saved.
    pub failed: u64,
}

/// Subscribe to `feed` and run the answer-fill procedure on every insert.
///
/// Events are handled one at a time in arrival order. Runs until the feed
/// closes or `shutdown` resolves; a save failure is logged and confined to
/// its own event. Only the initial subscription can fail the watcher.
pub async fn run_watcher<F>(
    feed: &dyn ChangeFeed,
    answerer: &Answerer,
    shutdown: F,
) -> Result<WatchStats, StoreError>
where
    F: Future<Output = ()>,
{
    let mut subscription = feed.subscribe().await?;
    info!(status = answerer.status(), "monitoring for new questions");

    let mut stats = WatchStats::default();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            event = subscription.next() => event,
        };
        let Some(event) = event else {
            warn!("change feed closed");
            break;
        };
        handle_change(answerer, event, &mut stats).await;
    }

    Ok(stats)
}

async fn handle_change(answerer: &Answerer, event: ChangeEvent, stats: &mut WatchStats) {
    if event.kind != ChangeKind::Added {
        debug!(id = %event.record.id, kind = ?event.kind, "ignoring change");
        return;
    }
    stats.added += 1;

    match answerer.fill(&event.record).await {
        Ok(Outcome::Answered {
            generation_failed, ..
        }) => {
            stats.answered += 1;
            if generation_failed {
                stats.generation_failures += 1;
            }
            info!(id = %event.record.id, "cycle complete, waiting for next question");
        }
        Ok(Outcome::Skipped(_)) => stats.skipped += 1,
        Ok(Outcome::LostRace) => stats.lost_races += 1,
        Err(e) => {
            stats.failed += 1;
            error!(id = %event.record.id, error = %e, "failed to save answer");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use reactor_core::config::WATCHER_STATUS;
    use reactor_core::record::{ANSWER_FIELD, QUESTION_FIELD, TIMESTAMP_FIELD};
    use reactor_core::{
        AnswerUpdate, DocumentStore, FieldValue, Fields, FillOutcome, GenerateError, Record,
        Subscription, TextGenerator,
    };
    use reactor_store::MemoryStore;
    use tokio::sync::{mpsc, oneshot};

    use super::*;

    /// Echoes the prompt back, or fails when asked to.
    #[derive(Default)]
    struct EchoModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for EchoModel {
        async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt == "fail" {
                return Err(GenerateError::Blocked("SAFETY".into()));
            }
            Ok(format!("answer to {prompt}"))
        }
    }

    fn question(text: &str) -> Fields {
        Fields::from([(QUESTION_FIELD.to_string(), FieldValue::from(text))])
    }

    fn answerer(store: &Arc<MemoryStore>, model: &Arc<EchoModel>) -> Answerer {
        Answerer::new(store.clone(), model.clone(), WATCHER_STATUS).with_server_timestamp(true)
    }

    /// Run the watcher until `stop` fires, returning its stats.
    fn spawn_watcher(
        store: Arc<MemoryStore>,
        model: Arc<EchoModel>,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<WatchStats>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let answerer = answerer(&store, &model);
            run_watcher(store.as_ref(), &answerer, async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap()
        });
        (stop_tx, handle)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn answers_existing_and_new_questions() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(EchoModel::default());
        let old = store.insert(question("What is 2+2?"));
        let answered = store.insert(Fields::from([
            (QUESTION_FIELD.to_string(), FieldValue::from("done?")),
            (ANSWER_FIELD.to_string(), FieldValue::from("yes")),
        ]));

        let (stop, handle) = spawn_watcher(store.clone(), model.clone());
        wait_for(|| store.write_count() == 1).await;

        let new = store.insert(question("Hi"));
        wait_for(|| store.write_count() == 2).await;

        stop.send(()).unwrap();
        let stats = handle.await.unwrap();

        let saved = store.get(&old).unwrap();
        assert_eq!(saved.answer(), Some("answer to What is 2+2?"));
        assert_eq!(saved.status(), Some("completed"));
        assert!(saved.fields.contains_key(TIMESTAMP_FIELD));
        assert_eq!(store.get(&new).unwrap().answer(), Some("answer to Hi"));
        assert_eq!(store.get(&answered).unwrap().answer(), Some("yes"));

        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.added, 3);
        assert_eq!(stats.answered, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn generation_failure_is_saved_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(EchoModel::default());
        let id = store.insert(question("fail"));

        let (stop, handle) = spawn_watcher(store.clone(), model);
        wait_for(|| store.write_count() == 1).await;
        stop.send(()).unwrap();
        let stats = handle.await.unwrap();

        let saved = store.get(&id).unwrap();
        assert_eq!(saved.answer(), Some("AI Error: prompt blocked: SAFETY"));
        assert_eq!(saved.status(), Some("completed"));
        assert_eq!(stats.generation_failures, 1);
    }

    #[tokio::test]
    async fn records_without_question_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(EchoModel::default());
        store.insert(Fields::from([("note".to_string(), FieldValue::from("hi"))]));

        let (stop, handle) = spawn_watcher(store.clone(), model.clone());
        // Give the replay a moment to be consumed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(()).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.write_count(), 0);
    }

    /// Feed whose events are pushed by the test; the store rejects every write.
    struct ScriptedFeed {
        events: std::sync::Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    }

    #[async_trait]
    impl ChangeFeed for ScriptedFeed {
        async fn subscribe(&self) -> Result<Subscription, StoreError> {
            let rx = self
                .events
                .lock()
                .unwrap()
                .take()
                .expect("subscribed twice");
            Ok(Subscription::new(rx, None))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn fill_answer(
            &self,
            _id: &str,
            _update: &AnswerUpdate,
        ) -> Result<FillOutcome, StoreError> {
            Err(StoreError::Server {
                status: 403,
                message: "PERMISSION_DENIED".into(),
            })
        }
    }

    #[tokio::test]
    async fn save_failure_does_not_stop_the_watcher() {
        let (tx, rx) = mpsc::channel(8);
        let feed = ScriptedFeed {
            events: std::sync::Mutex::new(Some(rx)),
        };
        let answerer = Answerer::new(
            Arc::new(BrokenStore),
            Arc::new(EchoModel::default()),
            WATCHER_STATUS,
        );

        for id in ["a", "b"] {
            tx.send(ChangeEvent::added(
                Record::new(id).with_field(QUESTION_FIELD, "Hi"),
            ))
            .await
            .unwrap();
        }
        tx.send(ChangeEvent {
            kind: ChangeKind::Removed,
            record: Record::new("c"),
        })
        .await
        .unwrap();
        drop(tx);

        // Feed closes after the scripted events, ending the watcher.
        let stats = run_watcher(&feed, &answerer, std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.added, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.answered, 0);
    }

    #[tokio::test]
    async fn shutdown_before_any_event() {
        let store = Arc::new(MemoryStore::new());
        let answerer = answerer(&store, &Arc::new(EchoModel::default()));
        let stats = run_watcher(store.as_ref(), &answerer, async {})
            .await
            .unwrap();
        assert_eq!(stats, WatchStats::default());
    }
}
