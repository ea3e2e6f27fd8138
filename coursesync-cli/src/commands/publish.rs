//! Bulk publish command.

use clap::Args;
use console::style;
use coursesync::bulk::{BulkAction, BulkError, BulkJobProgress, BulkState};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the publish command.
#[derive(Debug, Args)]
pub struct PublishArgs {
    /// publish, publish-modules, unpublish or unpublish-modules
    pub action: BulkAction,

    /// Module identifiers
    #[arg(required = true)]
    pub ids: Vec<String>,
}

pub fn run(runner: &CliRunner, args: PublishArgs) -> Result<(), CliError> {
    runner.log_startup("publish");
    runner.with_app(|app| async move {
        let PublishArgs { action, ids } = args;
        let many = ids.len() > 1;
        println!("Starting {} of {} modules (Ctrl+C cancels)", action, ids.len());

        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }

        let progress = app.bulk().start(ids.clone(), action);
        let result = tokio::select! {
            final_state = follow(progress, &bar) => final_state,
            _ = tokio::signal::ctrl_c() => {
                bar.set_message("cancelling");
                app.bulk().cancel(&ids, action).await;
                BulkState::Failed(BulkError::Cancelled.to_string())
            }
        };

        let outcome = match result {
            BulkState::Completed => {
                bar.finish_with_message("done");
                println!("{} {}", style("✓").green(), action.status_text(true, many));
                Ok(())
            }
            BulkState::Failed(reason) => {
                bar.abandon_with_message("failed");
                println!("{} {}", style("✗").red(), action.status_text(false, many));
                Err(CliError::Usage(reason))
            }
            other => Err(CliError::Usage(format!("job ended in state {:?}", other))),
        };
        app.shutdown().await;
        outcome
    })
}

/// Mirror a job's progress on the bar until it reaches a terminal state.
async fn follow(mut progress: watch::Receiver<BulkJobProgress>, bar: &ProgressBar) -> BulkState {
    loop {
        let current = progress.borrow_and_update().clone();
        match &current.state {
            BulkState::Running(fraction) => {
                bar.set_position((fraction * 100.0).round() as u64);
                if current.consecutive_failures > 0 {
                    bar.set_message(format!("retrying ({})", current.consecutive_failures));
                } else {
                    bar.set_message(String::new());
                }
            }
            state if state.is_terminal() => return state.clone(),
            _ => {}
        }
        if progress.changed().await.is_err() {
            // The job task is gone; its last published state is final.
            return progress.borrow().state.clone();
        }
    }
}
