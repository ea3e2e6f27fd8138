//! Logging setup.
//!
//! Installs a `tracing` subscriber that writes to a daily rolling file
//! through a non-blocking worker, and optionally to stderr. `RUST_LOG`
//! overrides the configured filter.
//!
//! ```ignore
//! let _guard = coursesync::logging::init_logging(&LoggingConfig::new(log_dir))?;
//! tracing::info!(batch_id = %id, "Batch started");
//! ```
//!
//! Keep the returned [`LoggingGuard`] alive until the process exits; dropping
//! it flushes and stops the file writer.

use std::path::{Path, PathBuf};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Default log file name prefix.
pub const DEFAULT_LOG_FILE_NAME: &str = "coursesync.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    pub filter: String,
    /// Mirror log lines to stderr.
    pub console: bool,
}

impl LoggingConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            filter: "info".to_string(),
            console: false,
        }
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self::new(settings.directory.clone())
            .with_file_name(settings.file_name.clone())
            .with_filter(settings.filter.clone())
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }
}

/// Keeps the file writer running.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    directory: PathBuf,
}

impl LoggingGuard {
    /// Directory the rolling log files are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    std::fs::create_dir_all(&config.directory).map_err(|source| {
        LoggingError::CreateDirectory {
            path: config.directory.clone(),
            source,
        }
    })?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::Filter {
            filter: config.filter.clone(),
            message: e.to_string(),
        })?,
    };

    // Local offset lookup can fail on multi-threaded processes; fall back to UTC.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, Rfc3339);

    let appender = tracing_appender::rolling::daily(&config.directory, &config.file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_timer(timer.clone());
    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(timer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _worker: worker,
        directory: config.directory.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_builders() {
        let config = LoggingConfig::new("/var/log/coursesync")
            .with_file_name("cs.log")
            .with_filter("coursesync=debug")
            .with_console(true);

        assert_eq!(config.directory, PathBuf::from("/var/log/coursesync"));
        assert_eq!(config.file_name, "cs.log");
        assert_eq!(config.filter, "coursesync=debug");
        assert!(config.console);
    }

    #[test]
    fn test_init_writes_rolling_file() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");

        let guard = init_logging(&LoggingConfig::new(&log_dir)).unwrap();
        tracing::info!(test = "logging", "Log line written");
        assert_eq!(guard.directory(), log_dir.as_path());
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|name| name.starts_with(DEFAULT_LOG_FILE_NAME)));

        assert!(matches!(
            init_logging(&LoggingConfig::new(&log_dir)),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
