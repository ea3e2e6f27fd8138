//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::{expand_home, ConfigError, ConfigFile};

/// One setting of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ApiBaseUrl,
    ApiTimeoutSecs,
    TransferSessionIdentifier,
    TransferSharedContainer,
    TransferTimeoutSecs,
    TransferPollIntervalMs,
    TransferTerminalWriteAttempts,
    BulkPollIntervalMs,
    BulkMaxRetries,
    StorePath,
    LoggingDirectory,
    LoggingFileName,
    LoggingFilter,
}

const ALL: [ConfigKey; 13] = [
    ConfigKey::ApiBaseUrl,
    ConfigKey::ApiTimeoutSecs,
    ConfigKey::TransferSessionIdentifier,
    ConfigKey::TransferSharedContainer,
    ConfigKey::TransferTimeoutSecs,
    ConfigKey::TransferPollIntervalMs,
    ConfigKey::TransferTerminalWriteAttempts,
    ConfigKey::BulkPollIntervalMs,
    ConfigKey::BulkMaxRetries,
    ConfigKey::StorePath,
    ConfigKey::LoggingDirectory,
    ConfigKey::LoggingFileName,
    ConfigKey::LoggingFilter,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::ApiBaseUrl | Self::ApiTimeoutSecs => "api",
            Self::TransferSessionIdentifier
            | Self::TransferSharedContainer
            | Self::TransferTimeoutSecs
            | Self::TransferPollIntervalMs
            | Self::TransferTerminalWriteAttempts => "transfer",
            Self::BulkPollIntervalMs | Self::BulkMaxRetries => "bulk",
            Self::StorePath => "store",
            Self::LoggingDirectory | Self::LoggingFileName | Self::LoggingFilter => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::ApiBaseUrl => "base_url",
            Self::ApiTimeoutSecs => "timeout_secs",
            Self::TransferSessionIdentifier => "session_identifier",
            Self::TransferSharedContainer => "shared_container",
            Self::TransferTimeoutSecs => "timeout_secs",
            Self::TransferPollIntervalMs => "poll_interval_ms",
            Self::TransferTerminalWriteAttempts => "terminal_write_attempts",
            Self::BulkPollIntervalMs => "poll_interval_ms",
            Self::BulkMaxRetries => "max_retries",
            Self::StorePath => "path",
            Self::LoggingDirectory => "directory",
            Self::LoggingFileName => "file_name",
            Self::LoggingFilter => "filter",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as text. Unset optional values are empty.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::ApiBaseUrl => config.api.base_url.clone(),
            Self::ApiTimeoutSecs => config.api.timeout_secs.to_string(),
            Self::TransferSessionIdentifier => config.transfer.session_identifier.clone(),
            Self::TransferSharedContainer => config
                .transfer
                .shared_container
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            Self::TransferTimeoutSecs => config.transfer.timeout_secs.to_string(),
            Self::TransferPollIntervalMs => config.transfer.poll_interval_ms.to_string(),
            Self::TransferTerminalWriteAttempts => {
                config.transfer.terminal_write_attempts.to_string()
            }
            Self::BulkPollIntervalMs => config.bulk.poll_interval_ms.to_string(),
            Self::BulkMaxRetries => config.bulk.max_retries.to_string(),
            Self::StorePath => config.store.path.display().to_string(),
            Self::LoggingDirectory => config.logging.directory.display().to_string(),
            Self::LoggingFileName => config.logging.file_name.clone(),
            Self::LoggingFilter => config.logging.filter.clone(),
        }
    }

    /// Parse and store a value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            Self::ApiBaseUrl => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(self.invalid(value, "expected an http or https URL"));
                }
                config.api.base_url = value.to_string();
            }
            Self::ApiTimeoutSecs => config.api.timeout_secs = self.positive(value)?,
            Self::TransferSessionIdentifier => {
                config.transfer.session_identifier = self.non_empty(value)?;
            }
            Self::TransferSharedContainer => {
                config.transfer.shared_container =
                    (!value.is_empty()).then(|| expand_home(value));
            }
            Self::TransferTimeoutSecs => config.transfer.timeout_secs = self.positive(value)?,
            Self::TransferPollIntervalMs => {
                config.transfer.poll_interval_ms = self.positive(value)?;
            }
            Self::TransferTerminalWriteAttempts => {
                config.transfer.terminal_write_attempts = self.positive(value)? as u32;
            }
            Self::BulkPollIntervalMs => config.bulk.poll_interval_ms = self.positive(value)?,
            Self::BulkMaxRetries => {
                config.bulk.max_retries = value
                    .parse()
                    .map_err(|_| self.invalid(value, "expected a whole number"))?;
            }
            Self::StorePath => config.store.path = self.path(value)?,
            Self::LoggingDirectory => config.logging.directory = self.path(value)?,
            Self::LoggingFileName => config.logging.file_name = self.non_empty(value)?,
            Self::LoggingFilter => config.logging.filter = self.non_empty(value)?,
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn positive(&self, value: &str) -> Result<u64, ConfigError> {
        match value.parse::<u64>() {
            Ok(n) if n > 0 && n <= u32::MAX as u64 => Ok(n),
            _ => Err(self.invalid(value, "expected a positive whole number")),
        }
    }

    fn non_empty(&self, value: &str) -> Result<String, ConfigError> {
        if value.is_empty() {
            Err(self.invalid(value, "must not be empty"))
        } else {
            Ok(value.to_string())
        }
    }

    fn path(&self, value: &str) -> Result<PathBuf, ConfigError> {
        self.non_empty(value).map(|value| expand_home(&value))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| format!("unknown configuration key '{}'", s))
    }
}
