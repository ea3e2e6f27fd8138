//! Application configuration for [`CourseSyncApp`](super::CourseSyncApp).
//!
//! `AppConfig` gathers the settings of every component in one place so the
//! bootstrap can wire them consistently. It is usually built from the
//! [`ConfigFile`] and then adjusted with the `with_*` methods.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::ApiConfig;
use crate::bulk::BulkConfig;
use crate::config::ConfigFile;
use crate::transfer::{
    SessionConfig, DEFAULT_POLL_INTERVAL, DEFAULT_TERMINAL_WRITE_ATTEMPTS,
    DEFAULT_TRANSFER_TIMEOUT,
};

/// Where the record store keeps its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Nothing survives the process.
    Memory,
    /// JSON snapshot at the given path.
    File(PathBuf),
}

/// Top-level configuration passed to `CourseSyncApp::start()`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,

    /// Identity and scratch directory of the transfer session.
    pub session: SessionConfig,

    /// Per-task transfer timeout.
    pub transfer_timeout: Duration,

    /// Attempts for the terminal store write of each transfer.
    pub terminal_write_attempts: u32,

    /// Interval of the batch completion poll.
    pub batch_poll_interval: Duration,

    pub bulk: BulkConfig,

    pub store: StoreLocation,
}

impl AppConfig {
    /// Defaults against the given API, with an in-memory store.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::new(base_url),
            session: SessionConfig::default(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            terminal_write_attempts: DEFAULT_TERMINAL_WRITE_ATTEMPTS,
            batch_poll_interval: DEFAULT_POLL_INTERVAL,
            bulk: BulkConfig::default(),
            store: StoreLocation::Memory,
        }
    }

    /// Build from the configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let mut session = SessionConfig::new(config.transfer.session_identifier.clone());
        if let Some(container) = &config.transfer.shared_container {
            session = session.with_shared_container(container.clone());
        }

        Self {
            api: ApiConfig::new(config.api.base_url.clone())
                .with_timeout(Duration::from_secs(config.api.timeout_secs)),
            session,
            transfer_timeout: Duration::from_secs(config.transfer.timeout_secs),
            terminal_write_attempts: config.transfer.terminal_write_attempts,
            batch_poll_interval: Duration::from_millis(config.transfer.poll_interval_ms),
            bulk: BulkConfig::new()
                .with_poll_interval(Duration::from_millis(config.bulk.poll_interval_ms))
                .with_max_retries(config.bulk.max_retries),
            store: StoreLocation::File(config.store.path.clone()),
        }
    }

    pub fn with_store(mut self, store: StoreLocation) -> Self {
        self.store = store;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_bulk(mut self, bulk: BulkConfig) -> Self {
        self.bulk = bulk;
        self
    }

    pub fn with_batch_poll_interval(mut self, interval: Duration) -> Self {
        self.batch_poll_interval = interval;
        self
    }
}
