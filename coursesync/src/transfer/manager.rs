//! Upload manager facade.
//!
//! Ties the transfer pieces together for callers that think in batches:
//! create a batch, add files, start it, watch it, retry what failed, cancel
//! it, and clean it up once the result has been committed elsewhere.
//!
//! # Example
//!
//! ```ignore
//! let batch = BatchId::from("assignment-12");
//! manager.create_batch(batch.clone(), BatchContext::Upload { context })?;
//! manager.enqueue_file(&batch, "essay.pdf", target).await?;
//! manager.upload(&batch).await?;
//! let outcome = manager
//!     .wait_until_finished(&batch, Duration::from_millis(500), None)
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::error::{TransferError, TransferResult};
use super::finished::{AllFinishedCheck, BatchOutcome, BatchProgress};
use super::observer::ObserverEvent;
use super::session::SessionProvider;
use super::starter::{ItemStarter, StartReport, TargetResolver};
use crate::store::{
    BatchContext, BatchId, ItemId, SharedStore, StoreError, StoreResult, TransferBatch,
    TransferDirection, TransferItem, TransferTarget,
};

/// Batch-level entry point to the transfer pipeline.
pub struct UploadManager {
    store: SharedStore,
    sessions: Arc<SessionProvider>,
    starter: ItemStarter,
    check: AllFinishedCheck,
}

impl UploadManager {
    pub fn new(
        store: SharedStore,
        sessions: Arc<SessionProvider>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            starter: ItemStarter::new(Arc::clone(&store), Arc::clone(&sessions), resolver),
            check: AllFinishedCheck::new(Arc::clone(&store)),
            store,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionProvider> {
        &self.sessions
    }

    /// Create a batch if it does not exist yet.
    pub fn create_batch(&self, batch_id: BatchId, context: BatchContext) -> StoreResult<()> {
        self.store.perform(|tx| {
            if tx.batch(&batch_id).is_none() {
                tx.insert_batch(TransferBatch::new(batch_id.clone(), context));
            }
            Ok(())
        })
    }

    /// Add a local file to a batch.
    ///
    /// The total size is taken from the file for uploads. Downloads start
    /// with an unknown total, which the first progress callback fills in.
    pub async fn enqueue_file(
        &self,
        batch_id: &BatchId,
        local_path: impl Into<PathBuf>,
        target: TransferTarget,
    ) -> TransferResult<ItemId> {
        let local_path = local_path.into();
        let direction = match target {
            TransferTarget::Upload { .. } => TransferDirection::Upload,
            TransferTarget::Download { .. } => TransferDirection::Download,
        };

        let bytes_total = match direction {
            TransferDirection::Upload => tokio::fs::metadata(&local_path)
                .await
                .map_err(|source| TransferError::LocalFile {
                    path: local_path.clone(),
                    source,
                })?
                .len(),
            TransferDirection::Download => 0,
        };

        let item = TransferItem::new(batch_id.clone(), direction, local_path, target, bytes_total);
        let item_id = self.store.perform(|tx| tx.insert_item(item))?;
        debug!(batch_id = %batch_id, item_id = %item_id, bytes_total, "File enqueued");
        Ok(item_id)
    }

    /// Start every pending item of a batch.
    pub async fn upload(&self, batch_id: &BatchId) -> TransferResult<StartReport> {
        info!(batch_id = %batch_id, "Starting batch");
        self.starter.start(batch_id).await
    }

    /// Restart the items of a batch that failed or were interrupted.
    ///
    /// An item is interrupted when it has no result and no task in the
    /// current session, e.g. after the process exited mid-transfer. Items
    /// that completed or are still running are left alone.
    pub async fn retry(&self, batch_id: &BatchId) -> TransferResult<StartReport> {
        let running = self.sessions.running_tags();
        let restart: Vec<ItemId> = self.store.read(|snapshot| {
            snapshot.batch_items(batch_id).map(|items| {
                items
                    .into_iter()
                    .filter(|item| {
                        item.error.is_some()
                            || (!item.is_terminal()
                                && !item
                                    .task_tag
                                    .as_ref()
                                    .is_some_and(|tag| running.contains(tag)))
                    })
                    .map(|item| item.id)
                    .collect::<Vec<_>>()
            })
        })?;

        info!(batch_id = %batch_id, items = restart.len(), "Retrying unfinished items");
        Ok(self.starter.start_items(&restart).await)
    }

    /// Cancel the running tasks of a batch and delete its records.
    ///
    /// Returns the number of tasks that were cancelled.
    pub fn cancel(&self, batch_id: &BatchId) -> TransferResult<usize> {
        let tags: Vec<String> = self.store.read(|snapshot| {
            snapshot.batch_items(batch_id).map(|items| {
                items
                    .into_iter()
                    .filter_map(|item| item.task_tag.clone())
                    .collect::<Vec<_>>()
            })
        })?;

        let cancelled = self.sessions.cancel_tasks(&tags);
        self.store.perform(|tx| tx.delete_batch(batch_id))?;
        info!(batch_id = %batch_id, cancelled, "Batch cancelled");
        Ok(cancelled)
    }

    /// Delete a batch whose items have all reached a terminal state.
    ///
    /// Returns false, leaving the batch in place, while items are still
    /// transferring.
    pub fn cleanup(&self, batch_id: &BatchId) -> StoreResult<bool> {
        self.store.perform(|tx| {
            let items = tx.batch_items(batch_id)?;
            if items.iter().any(|item| !item.is_terminal()) {
                return Ok(false);
            }
            tx.delete_batch(batch_id)?;
            Ok::<_, StoreError>(true)
        })
    }

    pub fn outcome(&self, batch_id: &BatchId) -> StoreResult<BatchOutcome> {
        self.check.is_batch_finished(batch_id)
    }

    pub fn progress(&self, batch_id: &BatchId) -> StoreResult<BatchProgress> {
        self.check.progress(batch_id)
    }

    /// Poll until the batch is finished.
    pub async fn wait_until_finished(
        &self,
        batch_id: &BatchId,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> TransferResult<BatchOutcome> {
        self.check
            .wait_until_finished(batch_id, interval, timeout)
            .await
    }

    /// Whether any transfer task is running.
    pub fn is_uploading(&self) -> bool {
        self.sessions.is_transferring()
    }

    /// Subscribe to the events of an item's running transfer.
    pub fn observe(&self, item_id: &ItemId) -> Option<broadcast::Receiver<ObserverEvent>> {
        let batch_id = self
            .store
            .read(|snapshot| snapshot.item(item_id).map(|item| item.batch_id.clone()))?;
        Some(
            self.sessions
                .cache()
                .get_or_create(*item_id, batch_id)
                .subscribe(),
        )
    }
}
