//! Application error types.

use std::fmt;

use crate::config::ConfigError;
use crate::logging::LoggingError;
use crate::store::StoreError;
use crate::sync::SelectorError;
use crate::transfer::TransferError;

/// Errors that can occur during the application lifecycle.
#[derive(Debug)]
pub enum AppError {
    /// The configuration file could not be used.
    Config(ConfigError),

    /// Logging could not be set up.
    Logging(LoggingError),

    /// The record store could not be opened or written.
    Store(StoreError),

    /// The transfer pipeline failed.
    Transfer(TransferError),

    /// The course catalog or selection failed.
    Selector(SelectorError),

    /// Failed to create the Tokio runtime.
    RuntimeCreation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Logging(e) => write!(f, "Failed to set up logging: {}", e),
            AppError::Store(e) => write!(f, "Store error: {}", e),
            AppError::Transfer(e) => write!(f, "Transfer error: {}", e),
            AppError::Selector(e) => write!(f, "Sync selection error: {}", e),
            AppError::RuntimeCreation(msg) => {
                write!(f, "Failed to create Tokio runtime: {}", msg)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Logging(e) => Some(e),
            AppError::Store(e) => Some(e),
            AppError::Transfer(e) => Some(e),
            AppError::Selector(e) => Some(e),
            AppError::RuntimeCreation(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl From<LoggingError> for AppError {
    fn from(e: LoggingError) -> Self {
        AppError::Logging(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl From<TransferError> for AppError {
    fn from(e: TransferError) -> Self {
        AppError::Transfer(e)
    }
}

impl From<SelectorError> for AppError {
    fn from(e: SelectorError) -> Self {
        AppError::Selector(e)
    }
}
