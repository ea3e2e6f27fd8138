//! Bulk job errors.

use thiserror::Error;

use crate::api::ApiError;

/// Reasons a bulk job ends in [`BulkState::Failed`](super::BulkState::Failed).
#[derive(Debug, Error)]
pub enum BulkError {
    /// The server refused to start the job.
    #[error("bulk request rejected: {0}")]
    Rejected(#[source] ApiError),

    /// Progress polling kept failing.
    #[error("progress polling failed {attempts} times in a row: {last}")]
    PollExhausted {
        attempts: u32,
        #[source]
        last: ApiError,
    },

    /// A poll failed in a way retrying cannot fix.
    #[error("progress polling failed: {0}")]
    Poll(#[source] ApiError),

    /// The server reported the job as failed.
    #[error("bulk job failed: {0}")]
    JobFailed(String),

    /// The job was cancelled locally.
    #[error("cancelled")]
    Cancelled,
}
