//! Bulk state changes.
//!
//! Publishing or unpublishing many modules at once is a server-side job:
//! the client starts it, polls its progress and refreshes its local copies
//! once the server is done. [`BulkStateChangeManager`] runs that loop.

mod action;
mod config;
mod error;
mod manager;

pub use action::{
    BulkAction, BulkJobProgress, BulkState, JobProgress, JobWorkflowState, PublishSubject,
};
pub use config::{BulkConfig, DEFAULT_MAX_POLL_RETRIES, DEFAULT_POLL_INTERVAL};
pub use error::BulkError;
pub use manager::{BulkApi, BulkStateChangeManager, LocalStateRefresher};
