//! Batch completion check.
//!
//! A pure read over the store. Safe to call as often as needed, from a timer
//! or from an observer's terminal hook.

use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::error::{TransferError, TransferResult};
use crate::store::{BatchId, SharedStore, StoreResult};

/// Default interval for [`AllFinishedCheck::wait_until_finished`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Aggregate state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// At least one item has neither a result nor an error.
    NotFinished,
    /// Every item is terminal and at least one failed.
    FinishedWithFailures,
    /// Every item completed successfully.
    FinishedOk,
}

impl BatchOutcome {
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::NotFinished)
    }
}

/// Byte and item totals of a batch, for progress display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub items_total: usize,
    pub items_completed: usize,
    pub items_failed: usize,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
}

/// Reads batch completion from the store.
#[derive(Debug, Clone)]
pub struct AllFinishedCheck {
    store: SharedStore,
}

impl AllFinishedCheck {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Classify a batch.
    ///
    /// An empty batch counts as finished.
    pub fn is_batch_finished(&self, batch_id: &BatchId) -> StoreResult<BatchOutcome> {
        self.store.read(|snapshot| {
            let items = snapshot.batch_items(batch_id)?;
            if items.iter().any(|item| !item.is_terminal()) {
                return Ok(BatchOutcome::NotFinished);
            }
            if items.iter().any(|item| item.error.is_some()) {
                Ok(BatchOutcome::FinishedWithFailures)
            } else {
                Ok(BatchOutcome::FinishedOk)
            }
        })
    }

    /// Item and byte totals of a batch.
    pub fn progress(&self, batch_id: &BatchId) -> StoreResult<BatchProgress> {
        self.store.read(|snapshot| {
            let items = snapshot.batch_items(batch_id)?;
            Ok(items.iter().fold(
                BatchProgress {
                    items_total: items.len(),
                    ..Default::default()
                },
                |mut progress, item| {
                    progress.bytes_transferred += item.bytes_transferred;
                    progress.bytes_total += item.bytes_total;
                    if item.is_completed() {
                        progress.items_completed += 1;
                    } else if item.error.is_some() {
                        progress.items_failed += 1;
                    }
                    progress
                },
            ))
        })
    }

    /// Poll until the batch is finished.
    ///
    /// # Errors
    ///
    /// Fails if the batch disappears or `timeout` elapses first.
    pub async fn wait_until_finished(
        &self,
        batch_id: &BatchId,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> TransferResult<BatchOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let outcome = self.is_batch_finished(batch_id)?;
            if outcome.is_finished() {
                debug!(batch_id = %batch_id, ?outcome, "Batch finished");
                return Ok(outcome);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(TransferError::Timeout {
                        batch_id: batch_id.clone(),
                        timeout,
                    });
                }
            }
        }
    }
}
