//! Per-item progress observer.
//!
//! A [`ProgressObserver`] receives the callbacks of exactly one transfer task
//! and mirrors them onto the item's record in the store. It is the only
//! writer of an item while its task is running.
//!
//! # Event Stream
//!
//! ```text
//! Progress* ──► (Completed | Failed) ──► channel closed
//! ```
//!
//! Listeners see any number of progress events, at most one terminal event,
//! and then `RecvError::Closed`. Callbacks arriving after the terminal event
//! are ignored.
//!
//! # Storage Failures
//!
//! Progress writes are best-effort: a failed save is logged and dropped, the
//! next tick overwrites it anyway. The terminal write is retried a bounded
//! number of times because losing it would leave the batch unfinished
//! forever.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::store::{
    BatchId, ItemId, SharedStore, StoreError, TransferDirection, TransferItem, TransferTarget,
    COMPLETED_WITHOUT_RESULT,
};

/// Default number of attempts for the terminal store write.
pub const DEFAULT_TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Capacity of each observer's broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Terminal result of one transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { remote_id: String },
    Failed { error: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    fn from_item(item: &TransferItem) -> Self {
        match (&item.error, &item.remote_id) {
            (Some(error), _) => Self::Failed {
                error: error.clone(),
            },
            (None, Some(remote_id)) => Self::Completed {
                remote_id: remote_id.clone(),
            },
            (None, None) => Self::Failed {
                error: COMPLETED_WITHOUT_RESULT.to_string(),
            },
        }
    }
}

/// Event published to observer subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObserverEvent {
    /// Cumulative byte counts.
    Progress { bytes_transferred: u64, bytes_total: u64 },
    /// The transfer finished; published exactly once.
    Finished(TransferOutcome),
}

type TerminalHook = Box<dyn FnOnce(&TransferOutcome) + Send>;

struct ObserverState {
    sender: Option<broadcast::Sender<ObserverEvent>>,
    hooks: Vec<TerminalHook>,
    completing: bool,
    outcome: Option<TransferOutcome>,
}

/// Server response body for a finished upload.
#[derive(Debug, Deserialize)]
struct RemoteFileResponse {
    id: serde_json::Value,
}

/// Tracks one transfer task and writes its progress to the store.
pub struct ProgressObserver {
    item_id: ItemId,
    batch_id: BatchId,
    store: SharedStore,
    terminal_write_attempts: u32,
    state: Mutex<ObserverState>,
}

impl ProgressObserver {
    /// Create an observer for one item.
    pub fn new(item_id: ItemId, batch_id: BatchId, store: SharedStore) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            item_id,
            batch_id,
            store,
            terminal_write_attempts: DEFAULT_TERMINAL_WRITE_ATTEMPTS,
            state: Mutex::new(ObserverState {
                sender: Some(sender),
                hooks: Vec::new(),
                completing: false,
                outcome: None,
            }),
        }
    }

    /// Set how many times the terminal write is attempted.
    pub fn with_terminal_write_attempts(mut self, attempts: u32) -> Self {
        self.terminal_write_attempts = attempts.max(1);
        self
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// The terminal outcome, once one has been published.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.state.lock().outcome.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Subscribe to this observer's events.
    ///
    /// Subscribing after the terminal event yields a receiver that is
    /// already closed; use [`outcome`](Self::outcome) to read the result.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        let state = self.state.lock();
        match &state.sender {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Register a hook that runs once, synchronously, with the terminal outcome.
    ///
    /// Runs immediately if the observer has already finished.
    pub fn on_terminal<F>(&self, hook: F)
    where
        F: FnOnce(&TransferOutcome) + Send + 'static,
    {
        let finished = {
            let mut state = self.state.lock();
            match &state.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    state.hooks.push(Box::new(hook));
                    return;
                }
            }
        };
        if let Some(outcome) = finished {
            hook(&outcome);
        }
    }

    /// Byte progress of an upload.
    pub fn did_send(&self, total_sent: u64, total_expected: u64) {
        self.record_progress(total_sent, total_expected);
    }

    /// Byte progress of a download.
    pub fn did_receive(&self, total_received: u64, total_expected: u64) {
        self.record_progress(total_received, total_expected);
    }

    /// Response body delivered by the server for an upload.
    ///
    /// The body is expected to describe the created remote file. A body that
    /// cannot be decoded is recorded as the item's error.
    pub fn did_receive_data(&self, data: &[u8]) {
        if self.is_completing() {
            return;
        }

        let decoded = serde_json::from_slice::<RemoteFileResponse>(data)
            .map_err(|e| format!("invalid upload response: {}", e))
            .and_then(|response| match response.id {
                serde_json::Value::String(id) => Ok(id),
                serde_json::Value::Number(id) => Ok(id.to_string()),
                other => Err(format!("invalid upload response id: {}", other)),
            });

        let result = self.store.perform(|tx| {
            tx.update_item(&self.item_id, |item| match decoded {
                Ok(remote_id) => item.record_success(remote_id),
                Err(error) => item.record_failure(error),
            })
        });
        if let Err(e) = result {
            warn!(item_id = %self.item_id, error = %e, "Failed to store upload response");
        }
    }

    /// The task finished, with a transport error or without one.
    ///
    /// Returns the published outcome, or `None` if this observer had already
    /// finished.
    pub fn did_complete(&self, error: Option<String>) -> Option<TransferOutcome> {
        {
            let mut state = self.state.lock();
            if state.completing {
                debug!(item_id = %self.item_id, "Ignoring duplicate completion");
                return None;
            }
            state.completing = true;
        }

        let outcome = self.write_terminal(error);
        self.publish_terminal(outcome.clone());
        Some(outcome)
    }

    fn is_completing(&self) -> bool {
        self.state.lock().completing
    }

    fn record_progress(&self, transferred: u64, total: u64) {
        if self.is_completing() {
            return;
        }

        let result = self.store.perform(|tx| {
            tx.update_item(&self.item_id, |item| {
                item.bytes_transferred = transferred;
                item.bytes_total = total;
            })
        });
        if let Err(e) = result {
            warn!(item_id = %self.item_id, error = %e, "Dropped progress update");
        }

        let state = self.state.lock();
        if let Some(sender) = &state.sender {
            // No subscribers is fine.
            let _ = sender.send(ObserverEvent::Progress {
                bytes_transferred: transferred,
                bytes_total: total,
            });
        }
    }

    /// Resolve the terminal state and persist it.
    fn write_terminal(&self, error: Option<String>) -> TransferOutcome {
        let mut last_error = None;

        for attempt in 1..=self.terminal_write_attempts {
            let error = error.clone();
            let result = self.store.perform(|tx| {
                let mut outcome = None;
                tx.update_item(&self.item_id, |item| {
                    resolve_terminal_state(item, error);
                    item.task_tag = None;
                    outcome = Some(TransferOutcome::from_item(item));
                })?;
                Ok::<_, StoreError>(outcome)
            });

            match result {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => break,
                Err(StoreError::ItemNotFound(_)) => {
                    debug!(item_id = %self.item_id, "Item deleted before completion");
                    break;
                }
                Err(e) => {
                    warn!(
                        item_id = %self.item_id,
                        attempt,
                        error = %e,
                        "Terminal write failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            error!(
                item_id = %self.item_id,
                batch_id = %self.batch_id,
                error = %e,
                "Terminal state could not be persisted"
            );
        }

        TransferOutcome::Failed {
            error: error.unwrap_or_else(|| COMPLETED_WITHOUT_RESULT.to_string()),
        }
    }

    fn publish_terminal(&self, outcome: TransferOutcome) {
        let (sender, hooks) = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome.clone());
            (state.sender.take(), std::mem::take(&mut state.hooks))
        };

        if let Some(sender) = sender {
            let _ = sender.send(ObserverEvent::Finished(outcome.clone()));
            // Dropping the last sender closes every receiver.
            drop(sender);
        }
        for hook in hooks {
            hook(&outcome);
        }
    }
}

/// Apply a completion to an item so it ends with exactly one of result or error.
fn resolve_terminal_state(item: &mut TransferItem, error: Option<String>) {
    if let Some(error) = error {
        item.record_failure(error);
        return;
    }
    if item.is_terminal() {
        return;
    }
    match (&item.direction, &item.target) {
        (TransferDirection::Download, TransferTarget::Download { file_id, .. }) => {
            let file_id = file_id.clone();
            item.record_success(file_id);
        }
        _ => item.record_failure(COMPLETED_WITHOUT_RESULT),
    }
}

/// Creates observers on behalf of the observer cache.
pub trait ObserverFactory: Send + Sync {
    fn create(&self, item_id: ItemId, batch_id: BatchId) -> Arc<ProgressObserver>;
}

/// Factory producing store-backed observers.
#[derive(Debug, Clone)]
pub struct StoreObserverFactory {
    store: SharedStore,
    terminal_write_attempts: u32,
}

impl StoreObserverFactory {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            terminal_write_attempts: DEFAULT_TERMINAL_WRITE_ATTEMPTS,
        }
    }

    pub fn with_terminal_write_attempts(mut self, attempts: u32) -> Self {
        self.terminal_write_attempts = attempts;
        self
    }
}

impl ObserverFactory for StoreObserverFactory {
    fn create(&self, item_id: ItemId, batch_id: BatchId) -> Arc<ProgressObserver> {
        Arc::new(
            ProgressObserver::new(item_id, batch_id, Arc::clone(&self.store))
                .with_terminal_write_attempts(self.terminal_write_attempts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        BatchContext, Persistence, Snapshot, Store, StoreResult, TransferBatch, UploadContext,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast::error::RecvError;

    fn upload_item(batch: &str) -> TransferItem {
        TransferItem::new(
            BatchId::from(batch),
            TransferDirection::Upload,
            PathBuf::from("/tmp/a.pdf"),
            TransferTarget::Upload {
                context: UploadContext::User,
                folder_path: None,
            },
            100,
        )
    }

    fn store_with(item: TransferItem) -> SharedStore {
        let store = Arc::new(Store::in_memory());
        store
            .perform(|tx| {
                tx.insert_batch(TransferBatch::new(
                    item.batch_id.clone(),
                    BatchContext::Upload {
                        context: UploadContext::User,
                    },
                ));
                tx.insert_item(item)
            })
            .unwrap();
        store
    }

    fn stored(store: &SharedStore, id: ItemId) -> TransferItem {
        store.read(|s| s.item(&id).cloned()).unwrap()
    }

    #[test]
    fn test_progress_is_written_to_store() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        observer.did_send(40, 120);

        let stored = stored(&store, id);
        assert_eq!(stored.bytes_transferred, 40);
        assert_eq!(stored.bytes_total, 120);
    }

    #[test]
    fn test_completion_with_response_succeeds() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        observer.did_receive_data(br#"{"id": 4242, "display_name": "a.pdf"}"#);
        let outcome = observer.did_complete(None);

        assert_eq!(
            outcome,
            Some(TransferOutcome::Completed {
                remote_id: "4242".to_string()
            })
        );
        let stored = stored(&store, id);
        assert_eq!(stored.remote_id.as_deref(), Some("4242"));
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_completion_without_result_records_synthetic_error() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        let outcome = observer.did_complete(None).unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                error: COMPLETED_WITHOUT_RESULT.to_string()
            }
        );
        let stored = stored(&store, id);
        assert_eq!(stored.error.as_deref(), Some(COMPLETED_WITHOUT_RESULT));
        assert!(stored.remote_id.is_none());
    }

    #[test]
    fn test_transport_error_overrides_remote_id() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        observer.did_receive_data(br#"{"id": "abc"}"#);
        observer.did_complete(Some("connection reset".to_string()));

        let stored = stored(&store, id);
        assert_eq!(stored.error.as_deref(), Some("connection reset"));
        assert!(stored.remote_id.is_none());
    }

    #[test]
    fn test_invalid_response_is_recorded_as_error() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        observer.did_receive_data(b"<html>502</html>");
        let outcome = observer.did_complete(None).unwrap();

        assert!(!outcome.is_success());
        assert!(stored(&store, id)
            .error
            .unwrap()
            .contains("invalid upload response"));
    }

    #[test]
    fn test_download_completion_uses_file_id() {
        let mut item = upload_item("b1");
        item.direction = TransferDirection::Download;
        item.target = TransferTarget::Download {
            file_id: "77".to_string(),
            url: "https://files.example.com/77".to_string(),
        };
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        let outcome = observer.did_complete(None).unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Completed {
                remote_id: "77".to_string()
            }
        );
    }

    #[test]
    fn test_completion_clears_task_tag() {
        let mut item = upload_item("b1");
        item.task_tag = Some("item:v1:x".to_string());
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        observer.did_complete(Some("cancelled".to_string()));

        assert!(stored(&store, id).task_tag.is_none());
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event_then_closed() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), store);
        let mut rx = observer.subscribe();

        observer.did_send(10, 100);
        observer.did_complete(Some("timeout".to_string()));
        assert!(observer.did_complete(None).is_none());
        observer.did_send(50, 100);

        assert_eq!(
            rx.recv().await.unwrap(),
            ObserverEvent::Progress {
                bytes_transferred: 10,
                bytes_total: 100
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ObserverEvent::Finished(TransferOutcome::Failed {
                error: "timeout".to_string()
            })
        );
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_subscribe_after_finish_is_closed() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), store);

        observer.did_complete(Some("boom".to_string()));
        let mut rx = observer.subscribe();

        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(observer.is_finished());
    }

    #[test]
    fn test_terminal_hooks_run_once() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), store);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        observer.on_terminal(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        observer.did_complete(None);
        observer.did_complete(None);

        let counter = Arc::clone(&calls);
        observer.on_terminal(move |outcome| {
            assert!(!outcome.is_success());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deleted_item_still_publishes_terminal() {
        let item = upload_item("b1");
        let id = item.id;
        let store = store_with(item);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));

        store.perform(|tx| tx.delete_item(&id)).unwrap();
        observer.did_send(1, 2);
        let outcome = observer.did_complete(None);

        assert!(matches!(outcome, Some(TransferOutcome::Failed { .. })));
    }

    /// Backend that fails a fixed number of saves before succeeding.
    struct FailingSaves {
        remaining: AtomicU32,
    }

    impl Persistence for FailingSaves {
        fn load(&self) -> StoreResult<Option<Snapshot>> {
            Ok(None)
        }

        fn save(&self, _snapshot: &Snapshot) -> StoreResult<()> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(StoreError::Persistence("busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_terminal_write_is_retried() {
        let persistence = Arc::new(FailingSaves {
            remaining: AtomicU32::new(0),
        });
        let store = Arc::new(Store::open(persistence.clone()).unwrap());
        let item = upload_item("b1");
        let id = item.id;
        store
            .perform(|tx| {
                tx.insert_batch(TransferBatch::new(
                    BatchId::from("b1"),
                    BatchContext::Upload {
                        context: UploadContext::User,
                    },
                ));
                tx.insert_item(item)
            })
            .unwrap();

        persistence.remaining.store(2, Ordering::SeqCst);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));
        observer.did_complete(Some("offline".to_string()));

        assert_eq!(stored(&store, id).error.as_deref(), Some("offline"));
    }

    #[test]
    fn test_progress_write_failure_is_swallowed() {
        let persistence = Arc::new(FailingSaves {
            remaining: AtomicU32::new(0),
        });
        let store = Arc::new(Store::open(persistence.clone()).unwrap());
        let item = upload_item("b1");
        let id = item.id;
        store
            .perform(|tx| {
                tx.insert_batch(TransferBatch::new(
                    BatchId::from("b1"),
                    BatchContext::Upload {
                        context: UploadContext::User,
                    },
                ));
                tx.insert_item(item)
            })
            .unwrap();

        persistence.remaining.store(1, Ordering::SeqCst);
        let observer = ProgressObserver::new(id, BatchId::from("b1"), Arc::clone(&store));
        observer.did_send(10, 100);
        observer.did_send(20, 100);

        assert_eq!(stored(&store, id).bytes_transferred, 20);
    }
}
