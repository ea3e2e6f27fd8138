//! Turns a selection into a download batch.
//!
//! Every selected file becomes one download [`TransferItem`] under
//! `<destination>/<course id>/files/`. Tabs carry no payload of their own
//! and are left to the caller's content sync.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use super::entry::SyncEntry;
use crate::store::{
    BatchContext, BatchId, ItemId, SharedStore, StoreError, StoreResult, TransferBatch,
    TransferDirection, TransferItem, TransferTarget,
};

/// A planned sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub batch_id: BatchId,
    pub item_ids: Vec<ItemId>,
    pub bytes_total: u64,
}

/// Creates offline-sync download batches in the store.
pub struct SyncPlanner {
    store: SharedStore,
}

impl SyncPlanner {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Plan a batch with a generated identifier.
    ///
    /// Returns `None` when no file is selected.
    pub fn plan(
        &self,
        entries: &[SyncEntry],
        destination_root: &Path,
    ) -> StoreResult<Option<SyncPlan>> {
        let batch_id = BatchId::new(format!(
            "offline-sync-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        self.plan_with_id(batch_id, entries, destination_root)
    }

    pub fn plan_with_id(
        &self,
        batch_id: BatchId,
        entries: &[SyncEntry],
        destination_root: &Path,
    ) -> StoreResult<Option<SyncPlan>> {
        let mut course_ids = Vec::new();
        let mut items = Vec::new();
        for entry in entries {
            let selected: Vec<_> = entry
                .files
                .iter()
                .filter(|file| file.selection().is_selected())
                .collect();
            if selected.is_empty() {
                continue;
            }
            course_ids.push(entry.id.clone());
            for file in selected {
                items.push(TransferItem::new(
                    batch_id.clone(),
                    TransferDirection::Download,
                    local_path(destination_root, &entry.id, &file.id, &file.display_name),
                    TransferTarget::Download {
                        file_id: file.id.clone(),
                        url: file.url.clone(),
                    },
                    file.size,
                ));
            }
        }
        if items.is_empty() {
            return Ok(None);
        }

        let bytes_total = items.iter().map(|item| item.bytes_total).sum();
        let item_ids = self.store.perform(|tx| {
            tx.insert_batch(TransferBatch::new(
                batch_id.clone(),
                BatchContext::OfflineSync { course_ids },
            ));
            items
                .into_iter()
                .map(|item| tx.insert_item(item))
                .collect::<Result<Vec<_>, StoreError>>()
        })?;

        info!(
            batch_id = %batch_id,
            items = item_ids.len(),
            bytes_total,
            "Sync batch planned"
        );
        Ok(Some(SyncPlan {
            batch_id,
            item_ids,
            bytes_total,
        }))
    }
}

fn local_path(root: &Path, course_id: &str, file_id: &str, display_name: &str) -> PathBuf {
    root.join(path_component(course_id))
        .join("files")
        .join(format!(
            "{}-{}",
            path_component(file_id),
            path_component(display_name)
        ))
}

/// One path segment that stays below its parent directory.
fn path_component(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "_".repeat(name.len().max(1))
    } else {
        name
    }
}
