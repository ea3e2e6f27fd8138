//! Offline sync commands: `courses` and `sync`.

use std::path::PathBuf;

use clap::Args;
use console::style;
use coursesync::sync::{EntrySelection, SelectionState, SyncEntry, SyncSelectorInteractor};

use super::common::{format_size, print_items, print_outcome, wait_for_batch};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the courses command.
#[derive(Debug, Args)]
pub struct CoursesArgs {
    /// Only show this course
    #[arg(long)]
    pub course: Option<String>,

    /// Select a node for offline use: COURSE, COURSE/TAB or COURSE/files/FILE
    #[arg(long, value_name = "NODE")]
    pub select: Vec<String>,

    /// Deselect a node: COURSE, COURSE/TAB or COURSE/files/FILE
    #[arg(long, value_name = "NODE")]
    pub deselect: Vec<String>,

    /// Select everything
    #[arg(long, conflicts_with = "none")]
    pub all: bool,

    /// Deselect everything
    #[arg(long)]
    pub none: bool,

    /// Show tabs and files
    #[arg(short, long)]
    pub expand: bool,
}

/// Parse a node address into a selection.
fn parse_node(node: &str) -> Result<EntrySelection, CliError> {
    let parts: Vec<&str> = node.split('/').collect();
    match parts.as_slice() {
        [course] if !course.is_empty() => Ok(EntrySelection::course(*course)),
        [course, "files", file] => Ok(EntrySelection::file(*course, *file)),
        [course, tab] => Ok(EntrySelection::tab(*course, *tab)),
        _ => Err(CliError::Usage(format!(
            "invalid node '{}': expected COURSE, COURSE/TAB or COURSE/files/FILE",
            node
        ))),
    }
}

pub fn run_courses(runner: &CliRunner, args: CoursesArgs) -> Result<(), CliError> {
    runner.log_startup("courses");
    let changes: Vec<(EntrySelection, SelectionState)> = args
        .select
        .iter()
        .map(|node| parse_node(node).map(|s| (s, SelectionState::Selected)))
        .chain(
            args.deselect
                .iter()
                .map(|node| parse_node(node).map(|s| (s, SelectionState::Deselected))),
        )
        .collect::<Result<_, _>>()?;

    runner.with_app(|app| async move {
        let mut selector = SyncSelectorInteractor::new(app.api().clone(), app.store().clone());
        if let Some(course_id) = &args.course {
            selector = selector.with_course_filter(course_id.clone());
        }
        selector.get_entries().await?;

        if args.all || args.none {
            selector.toggle_all(args.all).await?;
        }
        for (selection, state) in &changes {
            selector.set_selected(selection, *state).await?;
        }

        println!("{}", style(selector.course_name().await).bold());
        println!();
        let entries = selector.observe_entries().borrow().clone();
        for entry in &entries {
            let aggregate = selector.aggregate(&EntrySelection::course(&entry.id)).await?;
            println!(
                "{} {:<40} {} files, {}",
                marker(entry.selection()),
                format!("{} ({})", entry.name, entry.id),
                aggregate.selected_count,
                format_size(aggregate.total_bytes)
            );
            if args.expand {
                print_children(entry);
            }
        }

        println!();
        println!(
            "Selected: {} files, {}{}",
            *selector.observe_selected_count().borrow(),
            format_size(*selector.observe_selected_size().borrow()),
            if *selector.observe_is_everything_selected().borrow() {
                " (everything)"
            } else {
                ""
            }
        );

        app.shutdown().await;
        Ok(())
    })
}

fn marker(state: SelectionState) -> String {
    match state {
        SelectionState::Selected => style("[x]").green().to_string(),
        SelectionState::PartiallySelected => style("[-]").yellow().to_string(),
        SelectionState::Deselected => "[ ]".to_string(),
    }
}

fn print_children(entry: &SyncEntry) {
    if entry.is_empty() {
        println!("      {}", style("Nothing to sync").dim());
        return;
    }
    for tab in &entry.tabs {
        println!("    {} {} ({})", marker(tab.selection()), tab.name, tab.kind);
        if entry.is_files_container(&tab.id) {
            for file in &entry.files {
                println!(
                    "        {} {} ({})",
                    marker(file.selection()),
                    file.display_name,
                    format_size(file.size)
                );
            }
        }
    }
    if !entry.tabs.iter().any(|tab| entry.is_files_container(&tab.id)) {
        for file in &entry.files {
            println!(
                "    {} {} ({})",
                marker(file.selection()),
                file.display_name,
                format_size(file.size)
            );
        }
    }
}

/// Arguments for the sync command.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Directory the selected files are downloaded into
    pub destination: PathBuf,
}

pub fn run_sync(runner: &CliRunner, args: SyncArgs) -> Result<(), CliError> {
    runner.log_startup("sync");
    runner.with_app(|app| async move {
        app.selector().get_entries().await?;
        let Some(plan) = app.sync_selected(&args.destination).await? else {
            println!("Nothing selected. Use 'coursesync courses --select <course>' first.");
            app.shutdown().await;
            return Ok(());
        };

        println!(
            "Downloading {} files ({}) into {}",
            plan.item_ids.len(),
            format_size(plan.bytes_total),
            args.destination.display()
        );
        let outcome = wait_for_batch(&app, &plan.batch_id).await?;
        println!();
        print_items(&app, &plan.batch_id)?;
        print_outcome(&plan.batch_id, outcome);

        let dropped = app.selector().deselected_course_ids().await;
        if !dropped.is_empty() {
            println!("Not synced: {}", dropped.join(", "));
        }
        app.shutdown().await;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node() {
        assert_eq!(parse_node("7").unwrap(), EntrySelection::course("7"));
        assert_eq!(
            parse_node("7/assignments").unwrap(),
            EntrySelection::tab("7", "assignments")
        );
        assert_eq!(
            parse_node("7/files/42").unwrap(),
            EntrySelection::file("7", "42")
        );
        assert!(parse_node("").is_err());
        assert!(parse_node("7/a/b/c").is_err());
    }
}
