//! Offline course sync.
//!
//! The catalog is a forest of courses. Users select courses, tabs or files;
//! the [`SyncTree`] keeps every container's state derived from its leaves
//! and the [`SyncSelectorInteractor`] persists and publishes it. Once the
//! selection is final, the [`SyncPlanner`] turns it into a download batch
//! for the transfer pipeline.

mod entry;
mod planner;
mod selector;
mod tree;

pub use entry::{EntrySelection, SelectionState, SyncEntry, SyncFile, SyncTab, TabKind};
pub use planner::{SyncPlan, SyncPlanner};
pub use selector::{
    CatalogSource, SelectorError, SelectorResult, SyncSelectorInteractor, ALL_COURSES,
};
pub use tree::{Aggregate, EntryRow, SyncTree, TreeError, TreeResult};
