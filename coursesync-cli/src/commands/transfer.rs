//! Upload batch commands: `upload`, `status`, `retry` and `cancel`.
//!
//! Transfers run in this process, so `upload` and `retry` stay attached
//! until the batch is finished. An interrupted batch can be resumed with
//! `retry`.

use std::path::PathBuf;

use clap::Args;
use coursesync::store::{BatchContext, BatchId, TransferTarget, UploadContext};
use coursesync::transfer::BatchOutcome;
use coursesync::CourseSyncApp;

use super::common::{format_size, print_items, print_outcome, wait_for_batch};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the upload command.
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Batch name, used later with status, retry and cancel
    pub batch: String,

    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Upload into this course's files
    #[arg(long)]
    pub course: Option<String>,

    /// Submit the files to this assignment (requires --course)
    #[arg(long, requires = "course")]
    pub assignment: Option<String>,

    /// Submission comment
    #[arg(long, requires = "assignment")]
    pub comment: Option<String>,

    /// Upload into this folder
    #[arg(long, conflicts_with = "course")]
    pub folder_id: Option<String>,

    /// Folder path below the upload context
    #[arg(long)]
    pub folder_path: Option<String>,
}

impl UploadArgs {
    /// Remote context from the flags; personal files when none is given.
    fn context(&self) -> UploadContext {
        match (&self.course, &self.assignment, &self.folder_id) {
            (Some(course_id), Some(assignment_id), _) => UploadContext::Submission {
                course_id: course_id.clone(),
                assignment_id: assignment_id.clone(),
                comment: self.comment.clone(),
            },
            (Some(course_id), None, _) => UploadContext::Course {
                course_id: course_id.clone(),
            },
            (None, _, Some(folder_id)) => UploadContext::Folder {
                folder_id: folder_id.clone(),
            },
            (None, _, None) => UploadContext::User,
        }
    }
}

pub fn run_upload(runner: &CliRunner, args: UploadArgs) -> Result<(), CliError> {
    runner.log_startup("upload");
    let batch_id = BatchId::new(args.batch.clone());
    let context = args.context();

    runner.with_app(|app| async move {
        let uploads = app.uploads();
        uploads.create_batch(
            batch_id.clone(),
            BatchContext::Upload {
                context: context.clone(),
            },
        )?;
        for file in &args.files {
            uploads
                .enqueue_file(
                    &batch_id,
                    file.clone(),
                    TransferTarget::Upload {
                        context: context.clone(),
                        folder_path: args.folder_path.clone(),
                    },
                )
                .await?;
        }

        let progress = uploads.progress(&batch_id)?;
        println!(
            "Uploading {} files ({}) as batch {}",
            progress.items_total,
            format_size(progress.bytes_total),
            batch_id
        );
        let report = uploads.upload(&batch_id).await?;
        if report.failed_to_start > 0 {
            println!("{} files failed to start", report.failed_to_start);
        }

        finish(app, &batch_id).await
    })
}

pub fn run_status(runner: &CliRunner, batch: String) -> Result<(), CliError> {
    let batch_id = BatchId::new(batch);
    runner.with_app(|app| async move {
        let progress = app.uploads().progress(&batch_id)?;
        let outcome = app.uploads().outcome(&batch_id)?;

        println!("Batch {}", batch_id);
        println!(
            "  {} of {} files done, {} failed, {} of {}",
            progress.items_completed,
            progress.items_total,
            progress.items_failed,
            format_size(progress.bytes_transferred),
            format_size(progress.bytes_total)
        );
        println!();
        print_items(&app, &batch_id)?;
        println!();
        print_outcome(&batch_id, outcome);

        app.shutdown().await;
        Ok(())
    })
}

pub fn run_retry(runner: &CliRunner, batch: String) -> Result<(), CliError> {
    runner.log_startup("retry");
    let batch_id = BatchId::new(batch);
    runner.with_app(|app| async move {
        let report = app.uploads().retry(&batch_id).await?;
        if report.started == 0 && report.failed_to_start == 0 {
            println!("Nothing to retry in batch {}", batch_id);
            app.shutdown().await;
            return Ok(());
        }
        println!("Retrying {} files", report.started + report.failed_to_start);
        finish(app, &batch_id).await
    })
}

pub fn run_cancel(runner: &CliRunner, batch: String) -> Result<(), CliError> {
    runner.log_startup("cancel");
    let batch_id = BatchId::new(batch);
    runner.with_app(|app| async move {
        let cancelled = app.uploads().cancel(&batch_id)?;
        println!(
            "Cancelled batch {} ({} running transfers stopped)",
            batch_id, cancelled
        );
        app.shutdown().await;
        Ok(())
    })
}

/// Wait for the batch, report it, and drop it once everything succeeded.
async fn finish(app: CourseSyncApp, batch_id: &BatchId) -> Result<(), CliError> {
    let outcome = wait_for_batch(&app, batch_id).await?;
    println!();
    print_items(&app, batch_id)?;
    print_outcome(batch_id, outcome);

    if outcome == BatchOutcome::FinishedOk {
        app.uploads().cleanup(batch_id)?;
    }
    app.shutdown().await;
    Ok(())
}
