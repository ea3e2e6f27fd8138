//! Helpers shared across CLI commands.

use console::style;
use coursesync::store::{BatchId, TransferItem};
use coursesync::transfer::BatchOutcome;
use coursesync::CourseSyncApp;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::CliError;

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn bytes_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Follow a batch until every item is terminal, drawing a progress bar.
pub async fn wait_for_batch(
    app: &CourseSyncApp,
    batch_id: &BatchId,
) -> Result<BatchOutcome, CliError> {
    let interval = app.config().batch_poll_interval;
    let progress = app.uploads().progress(batch_id)?;
    let bar = bytes_bar(progress.bytes_total);

    loop {
        let progress = app.uploads().progress(batch_id)?;
        bar.set_length(progress.bytes_total);
        bar.set_position(progress.bytes_transferred);
        bar.set_message(format!(
            "{}/{} files",
            progress.items_completed + progress.items_failed,
            progress.items_total
        ));

        let outcome = app.uploads().outcome(batch_id)?;
        if outcome.is_finished() {
            bar.finish();
            return Ok(outcome);
        }
        tokio::time::sleep(interval).await;
    }
}

/// One line per item of a batch.
pub fn print_items(app: &CourseSyncApp, batch_id: &BatchId) -> Result<(), CliError> {
    let items: Vec<TransferItem> = app.store().read(|snapshot| {
        snapshot
            .batch_items(batch_id)
            .map(|items| items.into_iter().cloned().collect())
    })?;

    for item in &items {
        let name = item
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.local_path.display().to_string());
        let status = match (&item.remote_id, &item.error) {
            (_, Some(error)) => style(format!("failed: {}", error)).red().to_string(),
            (Some(remote_id), None) => style(format!("done ({})", remote_id)).green().to_string(),
            (None, None) if item.task_tag.is_some() => style("transferring").yellow().to_string(),
            (None, None) => style("pending").dim().to_string(),
        };
        println!(
            "  {:<40} {:>10}  {}",
            name,
            format_size(item.bytes_total),
            status
        );
    }
    Ok(())
}

/// Summary line for a finished batch.
pub fn print_outcome(batch_id: &BatchId, outcome: BatchOutcome) {
    match outcome {
        BatchOutcome::FinishedOk => {
            println!("{} Batch {} finished", style("✓").green(), batch_id)
        }
        BatchOutcome::FinishedWithFailures => println!(
            "{} Batch {} finished with failures; run 'coursesync retry {}'",
            style("✗").red(),
            batch_id,
            batch_id
        ),
        BatchOutcome::NotFinished => println!("Batch {} is still transferring", batch_id),
    }
}
