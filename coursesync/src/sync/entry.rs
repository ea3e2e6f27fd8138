//! Sync catalog entries.
//!
//! A [`SyncEntry`] is one course offered for offline use, with its tabs and
//! files. Selection state is derived: leaves (files, and every tab that is
//! not a files container) are set directly, containers are recomputed from
//! their leaves.
//!
//! ```text
//! Course ─┬─ Tab (assignments)        leaf
//!         ├─ Tab (pages)              leaf
//!         └─ Tab (files) ─┬─ File     leaf
//!                         └─ File     leaf
//! ```
//!
//! A files tab with no files is itself a leaf. When a course has files but
//! no files tab, the files hang directly off the course.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::SelectionKey;

/// Selection state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    Selected,
    #[default]
    Deselected,
    /// Only ever produced by roll-up.
    PartiallySelected,
}

impl SelectionState {
    pub fn from_selected(selected: bool) -> Self {
        if selected {
            Self::Selected
        } else {
            Self::Deselected
        }
    }

    pub fn is_selected(self) -> bool {
        self == Self::Selected
    }

    /// Derive a container state from its leaves. No leaves means deselected.
    pub fn roll_up<I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = SelectionState>,
    {
        let (mut selected, mut total) = (0usize, 0usize);
        for state in leaves {
            total += 1;
            if state.is_selected() {
                selected += 1;
            }
        }
        match selected {
            0 => Self::Deselected,
            n if n == total => Self::Selected,
            _ => Self::PartiallySelected,
        }
    }
}

/// Kind of content behind a course tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabKind {
    Assignments,
    Files,
    Pages,
    Grades,
    Quizzes,
    Announcements,
    Discussions,
    Modules,
    Syllabus,
    People,
    #[serde(other)]
    Other,
}

impl TabKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignments => "assignments",
            Self::Files => "files",
            Self::Pages => "pages",
            Self::Grades => "grades",
            Self::Quizzes => "quizzes",
            Self::Announcements => "announcements",
            Self::Discussions => "discussions",
            Self::Modules => "modules",
            Self::Syllabus => "syllabus",
            Self::People => "people",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TabKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabKind {
    type Err = std::convert::Infallible;

    /// Unknown kinds map to [`TabKind::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "assignments" => Self::Assignments,
            "files" => Self::Files,
            "pages" | "wiki" => Self::Pages,
            "grades" => Self::Grades,
            "quizzes" => Self::Quizzes,
            "announcements" => Self::Announcements,
            "discussions" | "discussion_topics" => Self::Discussions,
            "modules" => Self::Modules,
            "syllabus" => Self::Syllabus,
            "people" => Self::People,
            _ => Self::Other,
        })
    }
}

/// A file offered for sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFile {
    pub id: String,
    pub display_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Where the file can be downloaded from.
    pub url: String,
    #[serde(default)]
    pub(crate) selection: SelectionState,
}

impl SyncFile {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        size: u64,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            size,
            url: url.into(),
            selection: SelectionState::Deselected,
        }
    }

    pub fn selection(&self) -> SelectionState {
        self.selection
    }
}

/// A course tab offered for sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTab {
    pub id: String,
    pub name: String,
    pub kind: TabKind,
    #[serde(default = "collapsed")]
    pub is_collapsed: bool,
    #[serde(default)]
    pub(crate) selection: SelectionState,
}

impl SyncTab {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: TabKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            is_collapsed: true,
            selection: SelectionState::Deselected,
        }
    }

    pub fn selection(&self) -> SelectionState {
        self.selection
    }
}

fn collapsed() -> bool {
    true
}

/// A course with its tabs and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tabs: Vec<SyncTab>,
    #[serde(default)]
    pub files: Vec<SyncFile>,
    #[serde(default = "collapsed")]
    pub is_collapsed: bool,
    #[serde(default)]
    selection: SelectionState,
}

impl SyncEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tabs: Vec::new(),
            files: Vec::new(),
            is_collapsed: true,
            selection: SelectionState::Deselected,
        }
    }

    pub fn with_tab(mut self, tab: SyncTab) -> Self {
        self.tabs.push(tab);
        self
    }

    pub fn with_file(mut self, file: SyncFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn selection(&self) -> SelectionState {
        self.selection
    }

    /// A course with neither tabs nor files.
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty() && self.files.is_empty()
    }

    pub fn tab(&self, tab_id: &str) -> Option<&SyncTab> {
        self.tabs.iter().find(|tab| tab.id == tab_id)
    }

    pub fn file(&self, file_id: &str) -> Option<&SyncFile> {
        self.files.iter().find(|file| file.id == file_id)
    }

    /// Index of the tab whose children are the course files.
    pub(crate) fn files_container(&self) -> Option<usize> {
        if self.files.is_empty() {
            return None;
        }
        self.tabs.iter().position(|tab| tab.kind == TabKind::Files)
    }

    /// Whether the given tab holds the course files.
    pub fn is_files_container(&self, tab_id: &str) -> bool {
        self.files_container()
            .map(|index| self.tabs[index].id == tab_id)
            .unwrap_or(false)
    }

    /// Selection state of every leaf.
    pub(crate) fn leaf_states(&self) -> impl Iterator<Item = SelectionState> + '_ {
        let container = self.files_container();
        self.tabs
            .iter()
            .enumerate()
            .filter(move |(index, _)| Some(*index) != container)
            .map(|(_, tab)| tab.selection)
            .chain(self.files.iter().map(|file| file.selection))
    }

    // =========================================================================
    // Mutation (leaves first, then roll-up)
    // =========================================================================

    /// Apply a state to every leaf of the course.
    pub(crate) fn select_course(&mut self, state: SelectionState) {
        for tab in &mut self.tabs {
            tab.selection = state;
        }
        for file in &mut self.files {
            file.selection = state;
        }
        self.roll_up();
    }

    /// Apply a state to a tab and, for the files container, to every file.
    ///
    /// Returns false if the tab does not exist.
    pub(crate) fn select_tab(&mut self, tab_id: &str, state: SelectionState) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| tab.id == tab_id) else {
            return false;
        };
        self.tabs[index].selection = state;
        if self.files_container() == Some(index) {
            for file in &mut self.files {
                file.selection = state;
            }
        }
        self.roll_up();
        true
    }

    /// Apply a state to one file. Returns false if the file does not exist.
    pub(crate) fn select_file(&mut self, file_id: &str, state: SelectionState) -> bool {
        let Some(file) = self.files.iter_mut().find(|file| file.id == file_id) else {
            return false;
        };
        file.selection = state;
        self.roll_up();
        true
    }

    /// Recompute every derived state from the leaves.
    pub(crate) fn roll_up(&mut self) {
        if let Some(index) = self.files_container() {
            self.tabs[index].selection =
                SelectionState::roll_up(self.files.iter().map(|file| file.selection));
        }
        self.selection = SelectionState::roll_up(self.leaf_states());
    }
}

/// Address of a node in the sync tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntrySelection {
    Course { course_id: String },
    Tab { course_id: String, tab_id: String },
    File { course_id: String, file_id: String },
}

impl EntrySelection {
    pub fn course(course_id: impl Into<String>) -> Self {
        Self::Course {
            course_id: course_id.into(),
        }
    }

    pub fn tab(course_id: impl Into<String>, tab_id: impl Into<String>) -> Self {
        Self::Tab {
            course_id: course_id.into(),
            tab_id: tab_id.into(),
        }
    }

    pub fn file(course_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self::File {
            course_id: course_id.into(),
            file_id: file_id.into(),
        }
    }

    pub fn course_id(&self) -> &str {
        match self {
            Self::Course { course_id }
            | Self::Tab { course_id, .. }
            | Self::File { course_id, .. } => course_id,
        }
    }

    /// Storage key of the persisted record for this node.
    pub fn key(&self) -> SelectionKey {
        match self {
            Self::Course { course_id } => SelectionKey::course(course_id.as_str()),
            Self::Tab { course_id, tab_id } => SelectionKey::tab(course_id.as_str(), tab_id.as_str()),
            Self::File { course_id, file_id } => {
                SelectionKey::file(course_id.as_str(), file_id.as_str())
            }
        }
    }
}

impl fmt::Display for EntrySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> SyncEntry {
        SyncEntry::new("1", "Biology")
            .with_tab(SyncTab::new("assignments", "Assignments", TabKind::Assignments))
            .with_tab(SyncTab::new("files", "Files", TabKind::Files))
            .with_file(SyncFile::new("f1", "cell.pdf", 100, "https://x/f1"))
            .with_file(SyncFile::new("f2", "dna.pdf", 200, "https://x/f2"))
    }

    #[test]
    fn test_roll_up_rules() {
        use SelectionState::*;
        assert_eq!(SelectionState::roll_up([]), Deselected);
        assert_eq!(SelectionState::roll_up([Selected, Selected]), Selected);
        assert_eq!(SelectionState::roll_up([Deselected, Deselected]), Deselected);
        assert_eq!(SelectionState::roll_up([Selected, Deselected]), PartiallySelected);
    }

    #[test]
    fn test_select_file_rolls_up_through_files_tab() {
        let mut entry = course();

        entry.select_file("f1", SelectionState::Selected);

        assert_eq!(entry.tab("files").unwrap().selection(), SelectionState::PartiallySelected);
        assert_eq!(entry.selection(), SelectionState::PartiallySelected);

        entry.select_file("f2", SelectionState::Selected);
        assert_eq!(entry.tab("files").unwrap().selection(), SelectionState::Selected);
        assert_eq!(entry.selection(), SelectionState::PartiallySelected);

        entry.select_tab("assignments", SelectionState::Selected);
        assert_eq!(entry.selection(), SelectionState::Selected);
    }

    #[test]
    fn test_files_tab_cascades_to_files() {
        let mut entry = course();

        entry.select_tab("files", SelectionState::Selected);

        assert!(entry.files.iter().all(|f| f.selection().is_selected()));
        assert_eq!(entry.selection(), SelectionState::PartiallySelected);
    }

    #[test]
    fn test_files_tab_without_files_is_a_leaf() {
        let mut entry = SyncEntry::new("2", "Art")
            .with_tab(SyncTab::new("files", "Files", TabKind::Files));

        assert!(!entry.is_files_container("files"));
        entry.select_tab("files", SelectionState::Selected);
        assert_eq!(entry.selection(), SelectionState::Selected);
    }

    #[test]
    fn test_files_without_files_tab_hang_off_course() {
        let mut entry = SyncEntry::new("3", "Math")
            .with_file(SyncFile::new("f1", "a.pdf", 1, "https://x/f1"));

        entry.select_file("f1", SelectionState::Selected);
        assert_eq!(entry.selection(), SelectionState::Selected);
    }

    #[test]
    fn test_unknown_nodes_are_reported() {
        let mut entry = course();
        assert!(!entry.select_tab("nope", SelectionState::Selected));
        assert!(!entry.select_file("nope", SelectionState::Selected));
    }

    #[test]
    fn test_tab_kind_parsing() {
        assert_eq!("Files".parse::<TabKind>().unwrap(), TabKind::Files);
        assert_eq!("wiki".parse::<TabKind>().unwrap(), TabKind::Pages);
        assert_eq!("collaborations".parse::<TabKind>().unwrap(), TabKind::Other);
    }

    #[test]
    fn test_selection_keys() {
        assert_eq!(EntrySelection::course("1").key(), SelectionKey::course("1"));
        assert_eq!(
            EntrySelection::file("1", "f1").to_string(),
            "courses/1/files/f1"
        );
    }
}
