//! CourseSync CLI - command-line interface to the CourseSync engine.
//!
//! Uploads batches of files, selects course content for offline use and
//! downloads it, and runs bulk publish jobs against the configured server.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::courses::{CoursesArgs, SyncArgs};
use commands::publish::PublishArgs;
use commands::transfer::UploadArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "coursesync")]
#[command(about = "Offline course sync and background file transfers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity and mirror logs to stderr
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// View or edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Upload files as a named batch and wait for it to finish
    Upload(UploadArgs),

    /// Show the state of a batch
    Status {
        /// Batch name
        batch: String,
    },

    /// Restart the failed items of a batch
    Retry {
        /// Batch name
        batch: String,
    },

    /// Stop a batch and forget it
    Cancel {
        /// Batch name
        batch: String,
    },

    /// List courses and change what is selected for offline use
    Courses(CoursesArgs),

    /// Download everything selected for offline use
    Sync(SyncArgs),

    /// Publish or unpublish modules
    Publish(PublishArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let verbose = cli.verbose;
    // Config editing works without logging or a runtime.
    let runner = || CliRunner::new(verbose);

    match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Upload(args) => commands::transfer::run_upload(&runner()?, args),
        Commands::Status { batch } => commands::transfer::run_status(&runner()?, batch),
        Commands::Retry { batch } => commands::transfer::run_retry(&runner()?, batch),
        Commands::Cancel { batch } => commands::transfer::run_cancel(&runner()?, batch),
        Commands::Courses(args) => commands::courses::run_courses(&runner()?, args),
        Commands::Sync(args) => commands::courses::run_sync(&runner()?, args),
        Commands::Publish(args) => commands::publish::run(&runner()?, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from(["coursesync", "publish", "unpublish-modules", "4", "5"])
            .unwrap();
        match cli.command {
            Commands::Publish(args) => {
                assert_eq!(args.action.to_string(), "unpublish-modules");
                assert_eq!(args.ids, vec!["4", "5"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_publish_action_is_rejected() {
        assert!(Cli::try_parse_from(["coursesync", "publish", "archive", "4"]).is_err());
    }
}
