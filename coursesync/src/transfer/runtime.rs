//! Transfer runtime abstraction.
//!
//! The runtime is the facility that actually moves bytes. It creates
//! sessions scoped to a stable identifier, runs tagged tasks inside them,
//! and reports everything that happens as [`SessionEvent`]s on a channel
//! handed to it at session creation.
//!
//! ```text
//! SessionProvider ──create_session(config, tx)──► TransferRuntime
//!        ▲                                              │
//!        │                                              ▼
//!        └──────────── SessionEvent (rx) ◄──── TransferSession tasks
//! ```
//!
//! The engine only ever talks to these traits; [`HttpTransferRuntime`]
//! is the production implementation.
//!
//! [`HttpTransferRuntime`]: super::http_runtime::HttpTransferRuntime

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::error::TransferResult;
use crate::store::TransferDirection;

/// Default session identifier.
pub const DEFAULT_SESSION_IDENTIFIER: &str = "com.coursesync.transfer";

/// Completion error of a task cancelled by the caller.
pub const CANCELLED: &str = "cancelled";

// =============================================================================
// Configuration
// =============================================================================

/// Scope of a transfer session.
///
/// The identifier must be stable across restarts so tasks started by a
/// previous process can be reattached. The shared container is where the
/// runtime keeps task state visible to every process using the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub identifier: String,
    pub shared_container: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            shared_container: None,
        }
    }

    pub fn with_shared_container(mut self, path: impl Into<PathBuf>) -> Self {
        self.shared_container = Some(path.into());
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDENTIFIER)
    }
}

// =============================================================================
// Tasks and events
// =============================================================================

/// Everything the runtime needs to run one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Opaque identity reported back with every event of this task.
    pub tag: String,
    pub direction: TransferDirection,
    /// Source file for uploads, destination file for downloads.
    pub local_path: PathBuf,
    pub url: String,
    /// Opaque parameters the server asked to be sent with the upload.
    pub params: Vec<(String, String)>,
    pub bytes_total: u64,
}

/// Callback of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Sent {
        tag: String,
        total_sent: u64,
        total_expected: u64,
    },
    Received {
        tag: String,
        total_received: u64,
        total_expected: u64,
    },
    Data {
        tag: String,
        data: Vec<u8>,
    },
    /// Final callback. Cancelled tasks complete with an error.
    Completed {
        tag: String,
        error: Option<String>,
    },
}

impl TaskEvent {
    pub fn tag(&self) -> &str {
        match self {
            Self::Sent { tag, .. }
            | Self::Received { tag, .. }
            | Self::Data { tag, .. }
            | Self::Completed { tag, .. } => tag,
        }
    }
}

/// Event reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Task(TaskEvent),
    /// Every queued event has been delivered.
    FinishedEvents,
    /// The session is unusable and must not be reused.
    Invalidated { error: Option<String> },
}

/// Event tagged with the generation of the session that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Sender handed to the runtime for one session's events.
///
/// Each session gets its own generation number so events from a session
/// that has since been replaced can be told apart.
#[derive(Debug, Clone)]
pub struct SessionEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEnvelope>,
}

impl SessionEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once the receiving side is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(SessionEnvelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn send_task(&self, event: TaskEvent) -> bool {
        self.send(SessionEvent::Task(event))
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Facility that creates transfer sessions.
pub trait TransferRuntime: Send + Sync {
    /// Create a session, or reattach to the one already running under the
    /// same identifier.
    fn create_session(
        &self,
        config: &SessionConfig,
        events: SessionEventSender,
    ) -> TransferResult<Arc<dyn TransferSession>>;
}

/// A live session. Shared by every task of every batch.
pub trait TransferSession: Send + Sync {
    fn identifier(&self) -> &str;

    /// Create and resume a task.
    fn start_task(&self, request: TransferRequest) -> TransferResult<()>;

    /// Tags of tasks that have not completed yet.
    fn running_tags(&self) -> Vec<String>;

    /// Cancel one task. The task still reports a completion.
    fn cancel_task(&self, tag: &str);

    /// No more tasks will be created by the caller. The session reports
    /// [`SessionEvent::FinishedEvents`] once the last running task is done.
    fn finish_issuing(&self);

    /// Let running tasks finish, then invalidate.
    fn finish_and_invalidate(&self);

    /// Cancel everything and invalidate now.
    fn invalidate_and_cancel(&self);
}
