//! Sync selector interactor.
//!
//! Wraps a [`SyncTree`] with persistence and watch channels. Mutations are
//! serialized through one async mutex; each one is applied to a copy of the
//! tree, the affected course's
//! [`SelectionRecord`](crate::store::SelectionRecord)s are written to the
//! store, and only then is the copy installed and the views republished. A
//! failed write leaves the tree and the views untouched.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::entry::{EntrySelection, SelectionState, SyncEntry};
use super::tree::{Aggregate, EntryRow, SyncTree, TreeError};
use crate::api::{ApiError, ApiResult, BoxFuture};
use crate::store::{SharedStore, StoreError};

/// Title shown when no course filter is set.
pub const ALL_COURSES: &str = "All Courses";

/// Source of the syncable catalog.
pub trait CatalogSource: Send + Sync {
    /// Fetch every course with its syncable tabs and files.
    fn fetch_catalog(&self) -> BoxFuture<'_, ApiResult<Vec<SyncEntry>>>;
}

/// Errors raised by the selector.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] ApiError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("failed to persist selection: {0}")]
    Store(#[from] StoreError),
}

pub type SelectorResult<T> = Result<T, SelectorError>;

struct Views {
    entries: watch::Sender<Vec<SyncEntry>>,
    selected_count: watch::Sender<usize>,
    selected_size: watch::Sender<u64>,
    everything_selected: watch::Sender<bool>,
}

/// Selection state of the sync catalog, persisted and observable.
pub struct SyncSelectorInteractor {
    catalog: Arc<dyn CatalogSource>,
    store: SharedStore,
    course_filter: Option<String>,
    tree: Mutex<SyncTree>,
    views: Views,
}

impl SyncSelectorInteractor {
    pub fn new(catalog: Arc<dyn CatalogSource>, store: SharedStore) -> Self {
        Self {
            catalog,
            store,
            course_filter: None,
            tree: Mutex::new(SyncTree::default()),
            views: Views {
                entries: watch::channel(Vec::new()).0,
                selected_count: watch::channel(0).0,
                selected_size: watch::channel(0).0,
                everything_selected: watch::channel(false).0,
            },
        }
    }

    /// Limit the catalog to a single course.
    pub fn with_course_filter(mut self, course_id: impl Into<String>) -> Self {
        self.course_filter = Some(course_id.into());
        self
    }

    pub fn course_filter(&self) -> Option<&str> {
        self.course_filter.as_deref()
    }

    /// Fetch the catalog, restore persisted state and publish it.
    ///
    /// Network errors are returned as-is; nothing is retried here.
    pub async fn get_entries(&self) -> SelectorResult<Vec<SyncEntry>> {
        let mut entries = self.catalog.fetch_catalog().await.map_err(|err| {
            warn!(error = %err, "Catalog fetch failed");
            err
        })?;
        if let Some(course_id) = &self.course_filter {
            entries.retain(|entry| &entry.id == course_id);
        }

        let mut fresh = SyncTree::new(entries);
        let records = self.store.read(|snapshot| {
            fresh
                .entries()
                .iter()
                .flat_map(|entry| snapshot.selections_for_course(&entry.id))
                .cloned()
                .collect::<Vec<_>>()
        });
        fresh.apply_records(&records);

        let mut tree = self.tree.lock().await;
        *tree = fresh;
        self.publish(&tree);
        info!(
            courses = tree.len(),
            restored = records.len(),
            "Sync catalog loaded"
        );
        Ok(tree.entries().to_vec())
    }

    /// Select or deselect one node.
    pub async fn set_selected(
        &self,
        selection: &EntrySelection,
        state: SelectionState,
    ) -> SelectorResult<()> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        next.toggle_selection(selection, state)?;
        self.persist(&next, &[selection.course_id()])?;
        *tree = next;
        self.publish(&tree);
        debug!(node = %selection, ?state, "Selection changed");
        Ok(())
    }

    /// Collapse or expand one node.
    pub async fn set_collapsed(
        &self,
        selection: &EntrySelection,
        collapsed: bool,
    ) -> SelectorResult<()> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        next.set_collapsed(selection, collapsed)?;
        self.persist(&next, &[selection.course_id()])?;
        *tree = next;
        self.publish(&tree);
        Ok(())
    }

    /// Apply a selection to every course.
    pub async fn toggle_all(&self, is_selected: bool) -> SelectorResult<()> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        next.select_all(is_selected);
        let ids: Vec<String> = next.entries().iter().map(|entry| entry.id.clone()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.persist(&next, &ids)?;
        *tree = next;
        self.publish(&tree);
        debug!(is_selected, courses = ids.len(), "Selection applied to all courses");
        Ok(())
    }

    fn persist(&self, tree: &SyncTree, course_ids: &[&str]) -> SelectorResult<()> {
        let mut records = Vec::new();
        for course_id in course_ids {
            records.extend(tree.records_for_course(course_id)?);
        }
        self.store.perform(|tx| {
            for record in records {
                tx.upsert_selection(record);
            }
            Ok::<_, StoreError>(())
        })?;
        Ok(())
    }

    fn publish(&self, tree: &SyncTree) {
        let aggregate = tree.aggregate_all();
        self.views.entries.send_replace(tree.entries().to_vec());
        self.views.selected_count.send_replace(aggregate.selected_count);
        self.views.selected_size.send_replace(aggregate.total_bytes);
        self.views
            .everything_selected
            .send_replace(tree.is_everything_selected());
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn observe_entries(&self) -> watch::Receiver<Vec<SyncEntry>> {
        self.views.entries.subscribe()
    }

    pub fn observe_selected_count(&self) -> watch::Receiver<usize> {
        self.views.selected_count.subscribe()
    }

    pub fn observe_selected_size(&self) -> watch::Receiver<u64> {
        self.views.selected_size.subscribe()
    }

    pub fn observe_is_everything_selected(&self) -> watch::Receiver<bool> {
        self.views.everything_selected.subscribe()
    }

    pub async fn aggregate(&self, selection: &EntrySelection) -> SelectorResult<Aggregate> {
        Ok(self.tree.lock().await.aggregate(selection)?)
    }

    pub async fn rows(&self) -> Vec<EntryRow> {
        self.tree.lock().await.rows()
    }

    /// Title for the selector: the filtered course name, or [`ALL_COURSES`].
    pub async fn course_name(&self) -> String {
        let tree = self.tree.lock().await;
        self.course_filter
            .as_deref()
            .and_then(|id| tree.entry(id))
            .map(|entry| entry.name.clone())
            .unwrap_or_else(|| ALL_COURSES.to_string())
    }

    /// Courses with at least one selected leaf.
    pub async fn selected_entries(&self) -> Vec<SyncEntry> {
        self.tree
            .lock()
            .await
            .entries()
            .iter()
            .filter(|entry| entry.selection() != SelectionState::Deselected)
            .cloned()
            .collect()
    }

    /// Courses with nothing selected, whose offline data can be dropped.
    pub async fn deselected_course_ids(&self) -> Vec<String> {
        self.tree
            .lock()
            .await
            .entries()
            .iter()
            .filter(|entry| entry.selection() == SelectionState::Deselected)
            .map(|entry| entry.id.clone())
            .collect()
    }
}
