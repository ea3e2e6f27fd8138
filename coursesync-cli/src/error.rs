//! CLI error type.

use std::fmt;

use coursesync::app::AppError;
use coursesync::bulk::BulkError;
use coursesync::config::ConfigError;
use coursesync::logging::LoggingError;
use coursesync::store::StoreError;
use coursesync::sync::SelectorError;
use coursesync::transfer::TransferError;

/// Errors surfaced to the user by a command.
#[derive(Debug)]
pub enum CliError {
    /// Bad or unknown configuration.
    Config(String),
    /// Invalid command-line arguments.
    Usage(String),
    App(AppError),
    Store(StoreError),
    Transfer(TransferError),
    Selector(SelectorError),
    Bulk(BulkError),
}

impl CliError {
    /// Print the error and exit with a non-zero status.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        std::process::exit(1);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::App(e) => write!(f, "{}", e),
            CliError::Store(e) => write!(f, "Store error: {}", e),
            CliError::Transfer(e) => write!(f, "Transfer failed: {}", e),
            CliError::Selector(e) => write!(f, "Course selection failed: {}", e),
            CliError::Bulk(e) => write!(f, "Bulk job failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) | CliError::Usage(_) => None,
            CliError::App(e) => Some(e),
            CliError::Store(e) => Some(e),
            CliError::Transfer(e) => Some(e),
            CliError::Selector(e) => Some(e),
            CliError::Bulk(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::App(AppError::Logging(e))
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        CliError::App(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}

impl From<TransferError> for CliError {
    fn from(e: TransferError) -> Self {
        CliError::Transfer(e)
    }
}

impl From<SelectorError> for CliError {
    fn from(e: SelectorError) -> Self {
        CliError::Selector(e)
    }
}

impl From<BulkError> for CliError {
    fn from(e: BulkError) -> Self {
        CliError::Bulk(e)
    }
}
