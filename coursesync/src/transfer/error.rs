//! Transfer pipeline errors.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::store::{BatchId, StoreError};

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised by the transfer pipeline.
///
/// Per-item failures are recorded on the item and never surface here; these
/// errors concern whole batches or the session itself.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The runtime could not create a session.
    #[error("transfer session unavailable: {0}")]
    Session(String),

    /// The runtime refused to create a task.
    #[error("could not create transfer task: {0}")]
    Task(String),

    /// A local file could not be inspected.
    #[error("cannot read {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A batch did not finish within the allotted time.
    #[error("batch {batch_id} did not finish within {timeout:?}")]
    Timeout { batch_id: BatchId, timeout: Duration },
}
