//! Bulk job polling configuration.

use std::time::Duration;

/// Default delay between progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of consecutive failed polls tolerated before giving up.
pub const DEFAULT_MAX_POLL_RETRIES: u32 = 4;

/// Polling behavior of the bulk state-change manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkConfig {
    /// Delay between polls, also used as the fixed backoff after a failure.
    pub poll_interval: Duration,

    /// Consecutive poll failures allowed. One more fails the job.
    pub max_retries: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_POLL_RETRIES,
        }
    }
}

impl BulkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}
