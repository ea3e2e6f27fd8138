//! Binary transfer pipeline.
//!
//! Moves files between the device and the server and keeps the store's
//! [`TransferItem`](crate::store::TransferItem) records in step with the
//! running tasks.
//!
//! # Architecture
//!
//! ```text
//! UploadManager ──► ItemStarter ──► SessionProvider ──► TransferRuntime
//!                       │                 │                   │
//!                       │ stamp tag       │ SessionEvent      │ tasks
//!                       ▼                 ▼                   │
//!                     Store ◄──── ProgressObserver ◄── ObserverCache
//!                       │
//!                       ▼
//!                AllFinishedCheck
//! ```
//!
//! Every task carries a [`TaskIdentity`] tag. Callbacks are routed by tag
//! through the [`ObserverCache`] to the item's [`ProgressObserver`], the only
//! writer of that item while the task runs.

mod cache;
mod error;
mod finished;
mod http_runtime;
mod identity;
mod manager;
mod memory_runtime;
mod observer;
mod runtime;
mod session;
mod starter;

pub use cache::ObserverCache;
pub use error::{TransferError, TransferResult};
pub use finished::{AllFinishedCheck, BatchOutcome, BatchProgress, DEFAULT_POLL_INTERVAL};
pub use http_runtime::{HttpSession, HttpTransferRuntime, DEFAULT_TRANSFER_TIMEOUT};
pub use identity::TaskIdentity;
pub use manager::UploadManager;
pub use memory_runtime::{MemorySession, MemoryTransferRuntime};
pub use observer::{
    ObserverEvent, ObserverFactory, ProgressObserver, StoreObserverFactory, TransferOutcome,
    DEFAULT_TERMINAL_WRITE_ATTEMPTS,
};
pub use runtime::{
    SessionConfig, SessionEnvelope, SessionEvent, SessionEventSender, TaskEvent,
    TransferRequest, TransferRuntime, TransferSession, CANCELLED, DEFAULT_SESSION_IDENTIFIER,
};
pub use session::{CompletionHandler, SessionProvider};
pub use starter::{ItemStart, ItemStarter, ResolvedTarget, StartReport, TargetResolver};
