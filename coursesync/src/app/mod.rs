//! Application bootstrap and lifecycle management.
//!
//! [`CourseSyncApp`] builds every component from one [`AppConfig`] in
//! dependency order and owns the background work that must outlive a single
//! call, such as the transfer session event loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── CourseSyncApp ─────────────────────────────┐
//! │                                                                         │
//! │  Store ◄──────────────┬──────────────────┬──────────────────┐           │
//! │   │                   │                  │                  │           │
//! │   ▼                   │                  │                  │           │
//! │  ObserverCache ◄── SessionProvider ◄── UploadManager    SyncPlanner     │
//! │                       │  (event loop)       │                           │
//! │                       ▼                     │                           │
//! │               TransferRuntime               │                           │
//! │                                             ▼                           │
//! │  HttpApiClient ──► TargetResolver ──────────┘                           │
//! │        ├─────────► CatalogSource ──────► SyncSelectorInteractor          │
//! │        └─────────► BulkApi + Refresher ► BulkStateChangeManager          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod bootstrap;
mod config;
mod error;

pub use bootstrap::{build_runtime, CourseSyncApp};
pub use config::{AppConfig, StoreLocation};
pub use error::AppError;
