//! Starts transfer tasks for the pending items of a batch.
//!
//! For each item that has not completed yet the starter clears what a
//! previous attempt left behind, resolves where the bytes go, stamps the
//! task with the item's identity and resumes it. An item whose target cannot
//! be resolved is failed on the spot and the starter moves on: one item must
//! never hold up its siblings.
//!
//! `start` returns once every start attempt has been issued. Completion is
//! observed through the store (see [`AllFinishedCheck`]).
//!
//! [`AllFinishedCheck`]: super::finished::AllFinishedCheck

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::TransferResult;
use super::identity::TaskIdentity;
use super::runtime::TransferRequest;
use super::session::SessionProvider;
use crate::api::{ApiResult, BoxFuture};
use crate::store::{
    BatchId, ItemId, SharedStore, StoreError, TransferItem, TransferTarget, FAILED_TO_START,
};

/// Concrete destination of an upload as handed out by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: String,
    /// Opaque parameters to send along with the file.
    pub params: Vec<(String, String)>,
}

/// Resolves upload targets for items.
pub trait TargetResolver: Send + Sync {
    /// Ask the server where to upload an item.
    fn resolve_upload<'a>(&'a self, item: &'a TransferItem)
        -> BoxFuture<'a, ApiResult<ResolvedTarget>>;
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStart {
    Started { tag: String },
    FailedToStart { error: String },
    AlreadyCompleted,
    /// The item was deleted while the batch was being started.
    Vanished,
}

/// Counts of a batch start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: usize,
    pub failed_to_start: usize,
    pub skipped: usize,
}

impl StartReport {
    fn record(&mut self, start: &ItemStart) {
        match start {
            ItemStart::Started { .. } => self.started += 1,
            ItemStart::FailedToStart { .. } => self.failed_to_start += 1,
            ItemStart::AlreadyCompleted | ItemStart::Vanished => self.skipped += 1,
        }
    }
}

/// Issues transfer tasks for batches.
pub struct ItemStarter {
    store: SharedStore,
    sessions: Arc<SessionProvider>,
    resolver: Arc<dyn TargetResolver>,
}

impl ItemStarter {
    pub fn new(
        store: SharedStore,
        sessions: Arc<SessionProvider>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            store,
            sessions,
            resolver,
        }
    }

    /// Start every item of a batch that has not completed.
    ///
    /// # Errors
    ///
    /// Fails only if the batch does not exist. Per-item problems are
    /// recorded on the items.
    pub async fn start(&self, batch_id: &BatchId) -> TransferResult<StartReport> {
        let items: Vec<TransferItem> = self.store.read(|snapshot| {
            snapshot
                .batch_items(batch_id)
                .map(|items| items.into_iter().cloned().collect::<Vec<_>>())
        })?;

        let mut report = StartReport::default();
        for item in items {
            let start = self.start_one(item).await;
            report.record(&start);
        }
        self.sessions.finish_issuing();

        info!(
            batch_id = %batch_id,
            started = report.started,
            failed_to_start = report.failed_to_start,
            skipped = report.skipped,
            "Batch start issued"
        );
        Ok(report)
    }

    /// Start a single item.
    pub async fn start_item(&self, item_id: &ItemId) -> TransferResult<ItemStart> {
        let item = self
            .store
            .read(|snapshot| snapshot.item(item_id).cloned())
            .ok_or(StoreError::ItemNotFound(*item_id))?;
        let start = self.start_one(item).await;
        self.sessions.finish_issuing();
        Ok(start)
    }

    /// Start a chosen subset of items. Unknown identifiers are skipped.
    pub async fn start_items(&self, item_ids: &[ItemId]) -> StartReport {
        let mut report = StartReport::default();
        for item_id in item_ids {
            let start = match self.store.read(|snapshot| snapshot.item(item_id).cloned()) {
                Some(item) => self.start_one(item).await,
                None => ItemStart::Vanished,
            };
            report.record(&start);
        }
        self.sessions.finish_issuing();
        report
    }

    async fn start_one(&self, item: TransferItem) -> ItemStart {
        if item.is_completed() {
            debug!(item_id = %item.id, "Skipping completed item");
            return ItemStart::AlreadyCompleted;
        }

        let reset = self
            .store
            .perform(|tx| tx.update_item(&item.id, TransferItem::reset_transfer_state));
        match reset {
            Ok(()) => {}
            Err(StoreError::ItemNotFound(_)) => return ItemStart::Vanished,
            Err(e) => return self.fail_to_start(&item, e.to_string()),
        }

        let target = match &item.target {
            TransferTarget::Download { url, .. } => ResolvedTarget {
                url: url.clone(),
                params: Vec::new(),
            },
            TransferTarget::Upload { .. } => match self.resolver.resolve_upload(&item).await {
                Ok(target) => target,
                Err(e) => return self.fail_to_start(&item, e.to_string()),
            },
        };

        let session = match self.sessions.session() {
            Ok(session) => session,
            Err(e) => return self.fail_to_start(&item, e.to_string()),
        };

        let tag = TaskIdentity::new(item.id).encode();
        let stamped = self.store.perform(|tx| {
            tx.update_item(&item.id, |stored| stored.task_tag = Some(tag.clone()))
        });
        if let Err(e) = stamped {
            return self.fail_to_start(&item, e.to_string());
        }

        // Created before the task runs so listeners can subscribe early.
        self.sessions
            .cache()
            .get_or_create(item.id, item.batch_id.clone());

        let request = TransferRequest {
            tag: tag.clone(),
            direction: item.direction,
            local_path: item.local_path.clone(),
            url: target.url,
            params: target.params,
            bytes_total: item.bytes_total,
        };
        if let Err(e) = session.start_task(request) {
            return self.fail_to_start(&item, e.to_string());
        }

        debug!(item_id = %item.id, tag = %tag, "Transfer task started");
        ItemStart::Started { tag }
    }

    /// Record a terminal start failure on the item.
    fn fail_to_start(&self, item: &TransferItem, reason: String) -> ItemStart {
        let error = format!("{}: {}", FAILED_TO_START, reason);
        warn!(item_id = %item.id, batch_id = %item.batch_id, error = %error, "Item failed to start");

        let result = self.store.perform(|tx| {
            tx.update_item(&item.id, |stored| {
                stored.record_failure(error.clone());
                stored.task_tag = None;
            })
        });
        if let Err(e) = result {
            warn!(item_id = %item.id, error = %e, "Could not record start failure");
        }

        // An observer already exists if the task was stamped before failing.
        let cache = self.sessions.cache();
        if cache.contains(&item.id) {
            cache
                .get_or_create(item.id, item.batch_id.clone())
                .did_complete(Some(error.clone()));
        }
        ItemStart::FailedToStart { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::store::{
        BatchContext, Store, TransferBatch, TransferDirection, UploadContext,
    };
    use crate::transfer::cache::ObserverCache;
    use crate::transfer::memory_runtime::MemoryTransferRuntime;
    use crate::transfer::observer::StoreObserverFactory;
    use crate::transfer::runtime::SessionConfig;
    use std::path::PathBuf;

    /// Resolver that refuses items whose file name contains "broken".
    struct PickyResolver;

    impl TargetResolver for PickyResolver {
        fn resolve_upload<'a>(
            &'a self,
            item: &'a TransferItem,
        ) -> BoxFuture<'a, ApiResult<ResolvedTarget>> {
            Box::pin(async move {
                if item.local_path.to_string_lossy().contains("broken") {
                    Err(ApiError::Rejected("no upload target".to_string()))
                } else {
                    Ok(ResolvedTarget {
                        url: "https://upload.example.com/slot".to_string(),
                        params: vec![("key".to_string(), "abc".to_string())],
                    })
                }
            })
        }
    }

    struct Fixture {
        store: SharedStore,
        runtime: Arc<MemoryTransferRuntime>,
        starter: ItemStarter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::in_memory());
        let cache = Arc::new(ObserverCache::new(
            Arc::clone(&store),
            Arc::new(StoreObserverFactory::new(Arc::clone(&store))),
        ));
        let runtime = Arc::new(MemoryTransferRuntime::new());
        let sessions = Arc::new(SessionProvider::new(
            runtime.clone(),
            SessionConfig::default(),
            cache,
        ));
        let starter = ItemStarter::new(Arc::clone(&store), sessions, Arc::new(PickyResolver));
        Fixture {
            store,
            runtime,
            starter,
        }
    }

    fn add_items(store: &SharedStore, names: &[&str]) -> Vec<ItemId> {
        store
            .perform(|tx| {
                tx.insert_batch(TransferBatch::new(
                    BatchId::from("b1"),
                    BatchContext::Upload {
                        context: UploadContext::User,
                    },
                ));
                names
                    .iter()
                    .map(|name| {
                        tx.insert_item(TransferItem::new(
                            BatchId::from("b1"),
                            TransferDirection::Upload,
                            PathBuf::from(name),
                            TransferTarget::Upload {
                                context: UploadContext::User,
                                folder_path: None,
                            },
                            100,
                        ))
                    })
                    .collect::<Result<Vec<_>, StoreError>>()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_unresolvable_item_fails_fast() {
        let f = fixture();
        let ids = add_items(&f.store, &["a.pdf", "broken.pdf", "c.pdf"]);

        let report = f.starter.start(&BatchId::from("b1")).await.unwrap();

        assert_eq!(report.started, 2);
        assert_eq!(report.failed_to_start, 1);
        let broken = f.store.read(|s| s.item(&ids[1]).cloned()).unwrap();
        assert!(broken.error.unwrap().starts_with(FAILED_TO_START));
        assert!(broken.task_tag.is_none());

        let tags: Vec<String> = f.runtime.requests().into_iter().map(|r| r.tag).collect();
        assert_eq!(
            tags,
            vec![
                TaskIdentity::new(ids[0]).encode(),
                TaskIdentity::new(ids[2]).encode()
            ]
        );
        assert!(f.runtime.latest_session().unwrap().is_issuing_finished());
    }

    #[tokio::test]
    async fn test_start_stamps_tag_and_resets_state() {
        let f = fixture();
        let ids = add_items(&f.store, &["a.pdf"]);
        f.store
            .perform(|tx| {
                tx.update_item(&ids[0], |item| {
                    item.record_failure("old failure");
                    item.bytes_transferred = 40;
                })
            })
            .unwrap();

        f.starter.start(&BatchId::from("b1")).await.unwrap();

        let item = f.store.read(|s| s.item(&ids[0]).cloned()).unwrap();
        assert!(item.error.is_none());
        assert_eq!(item.bytes_transferred, 0);
        assert_eq!(item.task_tag, Some(TaskIdentity::new(ids[0]).encode()));
        let request = &f.runtime.requests()[0];
        assert_eq!(request.url, "https://upload.example.com/slot");
        assert_eq!(request.params.len(), 1);
    }

    #[tokio::test]
    async fn test_completed_items_are_skipped() {
        let f = fixture();
        let ids = add_items(&f.store, &["a.pdf", "b.pdf"]);
        f.store
            .perform(|tx| tx.update_item(&ids[0], |item| item.record_success("r-1")))
            .unwrap();

        let report = f.starter.start(&BatchId::from("b1")).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.started, 1);
        let done = f.store.read(|s| s.item(&ids[0]).cloned()).unwrap();
        assert_eq!(done.remote_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_missing_batch_is_an_error() {
        let f = fixture();
        let result = f.starter.start(&BatchId::from("nope")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_failure_fails_items() {
        let f = fixture();
        let ids = add_items(&f.store, &["a.pdf"]);
        f.runtime.set_fail_create(true);

        let report = f.starter.start(&BatchId::from("b1")).await.unwrap();

        assert_eq!(report.failed_to_start, 1);
        let item = f.store.read(|s| s.item(&ids[0]).cloned()).unwrap();
        assert!(item.is_terminal());
    }

    #[tokio::test]
    async fn test_start_single_item() {
        let f = fixture();
        let ids = add_items(&f.store, &["a.pdf", "b.pdf"]);

        let start = f.starter.start_item(&ids[1]).await.unwrap();

        assert_eq!(
            start,
            ItemStart::Started {
                tag: TaskIdentity::new(ids[1]).encode()
            }
        );
        assert_eq!(f.runtime.requests().len(), 1);
    }
}
