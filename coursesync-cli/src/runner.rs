//! Shared setup for commands that run the engine.
//!
//! Loads the configuration file, installs logging and owns the Tokio
//! runtime the engine runs on.

use std::future::Future;

use coursesync::app::{build_runtime, AppConfig, CourseSyncApp};
use coursesync::config::ConfigFile;
use coursesync::logging::{init_logging, LoggingConfig, LoggingGuard};
use tokio::runtime::Runtime;
use tracing::info;

use crate::error::CliError;

pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// `verbose` raises the log level and mirrors log lines to stderr.
    pub fn new(verbose: u8) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let mut logging = LoggingConfig::from_settings(&config.logging);
        if verbose > 0 {
            let level = if verbose == 1 { "debug" } else { "trace" };
            logging = logging
                .with_filter(format!("coursesync={}", level))
                .with_console(true);
        }
        let guard = init_logging(&logging)?;

        Ok(Self {
            config,
            runtime: build_runtime()?,
            _logging: guard,
        })
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = env!("CARGO_PKG_VERSION"),
            base_url = %self.config.api.base_url,
            "CourseSync CLI starting"
        );
    }

    /// Start the engine and run one command against it.
    pub fn with_app<F, Fut>(&self, command: F) -> Result<(), CliError>
    where
        F: FnOnce(CourseSyncApp) -> Fut,
        Fut: Future<Output = Result<(), CliError>>,
    {
        let config = AppConfig::from_config_file(&self.config);
        self.runtime.block_on(async {
            let app = CourseSyncApp::start(config).await?;
            command(app).await
        })
    }
}
