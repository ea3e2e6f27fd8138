//! INI configuration file.
//!
//! Settings live in `~/.coursesync/config.ini`:
//!
//! ```ini
//! [api]
//! base_url = https://lms.example.com/api/v1
//! timeout_secs = 30
//!
//! [transfer]
//! session_identifier = com.coursesync.transfer
//! shared_container = /var/lib/coursesync/transfers
//! timeout_secs = 1800
//! poll_interval_ms = 500
//! terminal_write_attempts = 3
//!
//! [bulk]
//! poll_interval_ms = 1000
//! max_retries = 4
//!
//! [store]
//! path = ~/.coursesync/store.json
//!
//! [logging]
//! directory = ~/.coursesync/logs
//! file_name = coursesync.log
//! filter = info
//! ```
//!
//! A missing file yields the defaults; unknown keys are ignored.

mod keys;

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

pub use keys::ConfigKey;

/// Directory name under the home directory.
pub const CONFIG_DIR_NAME: &str = ".coursesync";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/v1";

/// Errors raised while reading or writing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// `~/.coursesync`, or `./.coursesync` when no home directory is known.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub session_identifier: String,
    /// Scratch directory for the transfer runtime.
    pub shared_container: Option<PathBuf>,
    /// Per-task timeout.
    pub timeout_secs: u64,
    /// Interval of the batch completion poll.
    pub poll_interval_ms: u64,
    pub terminal_write_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSettings {
    pub poll_interval_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub api: ApiSettings,
    pub transfer: TransferSettings,
    pub bulk: BulkSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let dir = config_directory();
        Self {
            api: ApiSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                timeout_secs: crate::api::DEFAULT_API_TIMEOUT.as_secs(),
            },
            transfer: TransferSettings {
                session_identifier: crate::transfer::DEFAULT_SESSION_IDENTIFIER.to_string(),
                shared_container: None,
                timeout_secs: crate::transfer::DEFAULT_TRANSFER_TIMEOUT.as_secs(),
                poll_interval_ms: crate::transfer::DEFAULT_POLL_INTERVAL.as_millis() as u64,
                terminal_write_attempts: crate::transfer::DEFAULT_TERMINAL_WRITE_ATTEMPTS,
            },
            bulk: BulkSettings {
                poll_interval_ms: crate::bulk::DEFAULT_POLL_INTERVAL.as_millis() as u64,
                max_retries: crate::bulk::DEFAULT_MAX_POLL_RETRIES,
            },
            store: StoreSettings {
                path: dir.join("store.json"),
            },
            logging: LoggingSettings {
                directory: dir.join("logs"),
                file_name: "coursesync.log".to_string(),
                filter: "info".to_string(),
            },
        }
    }
}

impl ConfigFile {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from a file, falling back to defaults for anything it lacks.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Write every setting, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(write_error)
    }
}

/// Expand a leading `~/` to the home directory.
pub(crate) fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
