//! Record types persisted by the store.
//!
//! These are the durable counterparts of the in-flight transfer work and the
//! user's offline-sync selection. Everything here is plain data; mutation
//! rules live with the components that own each record.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error recorded when a task finishes with neither a result nor an error.
pub const COMPLETED_WITHOUT_RESULT: &str = "completed without result";

/// Prefix of the error recorded when a transfer could not be started.
pub const FAILED_TO_START: &str = "failed to start";

// =============================================================================
// Identifiers
// =============================================================================

/// Stable identifier of a transfer item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a transfer batch, e.g. `assignment-42` or `offline-sync-<uuid>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Transfer records
// =============================================================================

/// Which way the bytes flow for a transfer item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Where an uploaded file ends up on the remote side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadContext {
    /// Attachment for an assignment submission.
    Submission {
        course_id: String,
        assignment_id: String,
        comment: Option<String>,
    },
    /// A course's file area.
    Course { course_id: String },
    /// A specific folder.
    Folder { folder_id: String },
    /// The current user's personal files.
    User,
}

/// Remote side of a transfer item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferTarget {
    /// Upload into a remote context; the concrete upload URL is resolved at
    /// start time.
    Upload {
        context: UploadContext,
        folder_path: Option<String>,
    },
    /// Download of a remote file.
    Download { file_id: String, url: String },
}

/// One file moving between the device and the server.
///
/// Once the owning task terminates exactly one of `remote_id` and `error`
/// is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    pub id: ItemId,
    pub batch_id: BatchId,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub target: TransferTarget,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    /// Identifier assigned by the API on success.
    pub remote_id: Option<String>,
    /// Failure description on failure.
    pub error: Option<String>,
    /// Opaque identity stamped on the running transfer task.
    pub task_tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferItem {
    /// Create a new item with no transfer progress.
    pub fn new(
        batch_id: BatchId,
        direction: TransferDirection,
        local_path: PathBuf,
        target: TransferTarget,
        bytes_total: u64,
    ) -> Self {
        Self {
            id: ItemId::new(),
            batch_id,
            direction,
            local_path,
            target,
            bytes_transferred: 0,
            bytes_total,
            remote_id: None,
            error: None,
            task_tag: None,
            created_at: Utc::now(),
        }
    }

    /// True once a result or an error has been recorded.
    pub fn is_terminal(&self) -> bool {
        self.remote_id.is_some() || self.error.is_some()
    }

    /// True if the transfer finished successfully.
    pub fn is_completed(&self) -> bool {
        self.remote_id.is_some() && self.error.is_none()
    }

    /// Clear everything a previous attempt left behind.
    pub fn reset_transfer_state(&mut self) {
        self.remote_id = None;
        self.error = None;
        self.bytes_transferred = 0;
        self.task_tag = None;
    }

    /// Record a successful result.
    pub fn record_success(&mut self, remote_id: impl Into<String>) {
        self.remote_id = Some(remote_id.into());
        self.error = None;
    }

    /// Record a terminal failure.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.remote_id = None;
    }
}

/// What a batch is for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchContext {
    /// Files uploaded together into one remote context.
    Upload { context: UploadContext },
    /// Files downloaded by an offline-sync job.
    OfflineSync { course_ids: Vec<String> },
}

/// A set of transfer items tracked together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub id: BatchId,
    pub context: BatchContext,
    /// Items in insertion order.
    pub item_ids: Vec<ItemId>,
    pub created_at: DateTime<Utc>,
}

impl TransferBatch {
    pub fn new(id: BatchId, context: BatchContext) -> Self {
        Self {
            id,
            context,
            item_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Selection records
// =============================================================================

/// Address of a persisted selection: a course, one of its tabs, or one of its files.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SelectionKey {
    pub course_id: String,
    pub tab_id: Option<String>,
    pub file_id: Option<String>,
}

impl SelectionKey {
    pub fn course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            tab_id: None,
            file_id: None,
        }
    }

    pub fn tab(course_id: impl Into<String>, tab_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            tab_id: Some(tab_id.into()),
            file_id: None,
        }
    }

    pub fn file(course_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            tab_id: None,
            file_id: Some(file_id.into()),
        }
    }

    /// Flat string form used as the storage key.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "courses/{}", self.course_id)?;
        if let Some(tab) = &self.tab_id {
            write!(f, "/tabs/{}", tab)?;
        }
        if let Some(file) = &self.file_id {
            write!(f, "/files/{}", file)?;
        }
        Ok(())
    }
}

/// Persisted selection and collapse state for one node of the sync tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub key: SelectionKey,
    pub is_selected: bool,
    pub is_collapsed: bool,
}

impl SelectionRecord {
    pub fn new(key: SelectionKey) -> Self {
        Self {
            key,
            is_selected: false,
            is_collapsed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> TransferItem {
        TransferItem::new(
            BatchId::from("assignment-1"),
            TransferDirection::Upload,
            PathBuf::from("/tmp/essay.pdf"),
            TransferTarget::Upload {
                context: UploadContext::User,
                folder_path: None,
            },
            1024,
        )
    }

    #[test]
    fn test_new_item_is_not_terminal() {
        let item = item();
        assert!(!item.is_terminal());
        assert!(!item.is_completed());
        assert_eq!(item.bytes_total, 1024);
    }

    #[test]
    fn test_failure_clears_remote_id() {
        let mut item = item();
        item.record_success("77");
        item.record_failure("socket closed");

        assert!(item.is_terminal());
        assert!(item.remote_id.is_none());
        assert_eq!(item.error.as_deref(), Some("socket closed"));
    }

    #[test]
    fn test_reset_transfer_state() {
        let mut item = item();
        item.bytes_transferred = 512;
        item.task_tag = Some("tag".to_string());
        item.record_failure("boom");

        item.reset_transfer_state();

        assert!(!item.is_terminal());
        assert_eq!(item.bytes_transferred, 0);
        assert!(item.task_tag.is_none());
    }

    #[test]
    fn test_selection_key_display() {
        assert_eq!(SelectionKey::course("1").to_string(), "courses/1");
        assert_eq!(
            SelectionKey::tab("1", "files").to_string(),
            "courses/1/tabs/files"
        );
        assert_eq!(SelectionKey::file("1", "9").to_string(), "courses/1/files/9");
    }

    #[test]
    fn test_item_id_parse() {
        let id = ItemId::new();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ItemId>().is_err());
    }
}
