//! Store error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::records::{BatchId, ItemId};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch identifier no longer resolves.
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The item identifier no longer resolves.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Reading or writing the backing file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific save failure.
    #[error("persistence failed: {0}")]
    Persistence(String),
}
