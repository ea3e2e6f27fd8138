//! Selection tree over the sync catalog.
//!
//! Every write goes leaves first and then rolls up to the course. The
//! per-course [`Aggregate`] is recomputed right after each write to that
//! course, so reads never walk the tree.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use super::entry::{EntrySelection, SelectionState, SyncEntry};
use crate::store::{SelectionKey, SelectionRecord};

/// Errors raised by tree mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Partial selection is derived and cannot be requested.
    #[error("selection state {0:?} cannot be applied directly")]
    InvalidSelection(SelectionState),

    #[error("course not found: {0}")]
    CourseNotFound(String),

    #[error("tab {tab_id} not found in course {course_id}")]
    TabNotFound { course_id: String, tab_id: String },

    #[error("file {file_id} not found in course {course_id}")]
    FileNotFound { course_id: String, file_id: String },

    /// Files have no children to collapse.
    #[error("{0} cannot be collapsed")]
    NotCollapsible(String),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Selected files and the bytes they would download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregate {
    /// Selected files strictly under the node.
    pub selected_count: usize,
    /// Total size of the selected files.
    pub total_bytes: u64,
}

impl std::ops::Add for Aggregate {
    type Output = Aggregate;

    fn add(self, other: Aggregate) -> Aggregate {
        Aggregate {
            selected_count: self.selected_count + other.selected_count,
            total_bytes: self.total_bytes + other.total_bytes,
        }
    }
}

/// One visible row of the flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRow {
    Course { course_id: String },
    Tab { course_id: String, tab_id: String },
    File { course_id: String, file_id: String },
    /// Placeholder under an expanded course that has nothing to sync.
    Empty { course_id: String },
}

impl EntryRow {
    /// Stable row identifier.
    pub fn id(&self) -> String {
        match self {
            Self::Course { course_id } => format!("course-{}", course_id),
            Self::Tab { course_id, tab_id } => format!("course-{}-tab-{}", course_id, tab_id),
            Self::File { course_id, file_id } => format!("course-{}-file-{}", course_id, file_id),
            Self::Empty { course_id } => format!("course-{}-empty", course_id),
        }
    }
}

/// The sync catalog with derived selection state.
#[derive(Debug, Clone, Default)]
pub struct SyncTree {
    entries: Vec<SyncEntry>,
    aggregates: HashMap<String, Aggregate>,
}

impl SyncTree {
    pub fn new(entries: Vec<SyncEntry>) -> Self {
        let mut tree = Self {
            entries,
            aggregates: HashMap::new(),
        };
        for index in 0..tree.entries.len() {
            tree.entries[index].roll_up();
            tree.refresh_aggregate(index);
        }
        tree
    }

    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SyncEntry> {
        self.entries
    }

    pub fn entry(&self, course_id: &str) -> Option<&SyncEntry> {
        self.entries.iter().find(|entry| entry.id == course_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn course_index(&self, course_id: &str) -> TreeResult<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == course_id)
            .ok_or_else(|| TreeError::CourseNotFound(course_id.to_string()))
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Apply a selection to a node, cascading down and rolling up.
    pub fn toggle_selection(
        &mut self,
        selection: &EntrySelection,
        state: SelectionState,
    ) -> TreeResult<()> {
        if state == SelectionState::PartiallySelected {
            return Err(TreeError::InvalidSelection(state));
        }
        let index = self.course_index(selection.course_id())?;
        let entry = &mut self.entries[index];

        match selection {
            EntrySelection::Course { .. } => entry.select_course(state),
            EntrySelection::Tab { course_id, tab_id } => {
                if !entry.select_tab(tab_id, state) {
                    return Err(TreeError::TabNotFound {
                        course_id: course_id.clone(),
                        tab_id: tab_id.clone(),
                    });
                }
            }
            EntrySelection::File { course_id, file_id } => {
                if !entry.select_file(file_id, state) {
                    return Err(TreeError::FileNotFound {
                        course_id: course_id.clone(),
                        file_id: file_id.clone(),
                    });
                }
            }
        }

        self.refresh_aggregate(index);
        trace!(node = %selection, ?state, "Selection applied");
        Ok(())
    }

    /// Select or deselect every course.
    pub fn select_all(&mut self, is_selected: bool) {
        let state = SelectionState::from_selected(is_selected);
        for index in 0..self.entries.len() {
            self.entries[index].select_course(state);
            self.refresh_aggregate(index);
        }
    }

    /// Whether every course that has something to sync is selected.
    ///
    /// False when no such course exists.
    pub fn is_everything_selected(&self) -> bool {
        let mut candidates = self.entries.iter().filter(|entry| !entry.is_empty()).peekable();
        candidates.peek().is_some() && candidates.all(|entry| entry.selection().is_selected())
    }

    // =========================================================================
    // Collapse
    // =========================================================================

    pub fn toggle_collapse(&mut self, selection: &EntrySelection) -> TreeResult<bool> {
        let collapsed = self.is_collapsed(selection)?;
        self.set_collapsed(selection, !collapsed)?;
        Ok(!collapsed)
    }

    pub fn set_collapsed(&mut self, selection: &EntrySelection, collapsed: bool) -> TreeResult<()> {
        let index = self.course_index(selection.course_id())?;
        let entry = &mut self.entries[index];
        match selection {
            EntrySelection::Course { .. } => entry.is_collapsed = collapsed,
            EntrySelection::Tab { course_id, tab_id } => {
                let tab = entry
                    .tabs
                    .iter_mut()
                    .find(|tab| &tab.id == tab_id)
                    .ok_or_else(|| TreeError::TabNotFound {
                        course_id: course_id.clone(),
                        tab_id: tab_id.clone(),
                    })?;
                tab.is_collapsed = collapsed;
            }
            EntrySelection::File { .. } => {
                return Err(TreeError::NotCollapsible(selection.to_string()));
            }
        }
        Ok(())
    }

    fn is_collapsed(&self, selection: &EntrySelection) -> TreeResult<bool> {
        let entry = &self.entries[self.course_index(selection.course_id())?];
        match selection {
            EntrySelection::Course { .. } => Ok(entry.is_collapsed),
            EntrySelection::Tab { course_id, tab_id } => entry
                .tab(tab_id)
                .map(|tab| tab.is_collapsed)
                .ok_or_else(|| TreeError::TabNotFound {
                    course_id: course_id.clone(),
                    tab_id: tab_id.clone(),
                }),
            EntrySelection::File { .. } => Err(TreeError::NotCollapsible(selection.to_string())),
        }
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn refresh_aggregate(&mut self, index: usize) {
        let entry = &self.entries[index];
        let aggregate = entry
            .files
            .iter()
            .filter(|file| file.selection().is_selected())
            .fold(Aggregate::default(), |acc, file| {
                acc + Aggregate {
                    selected_count: 1,
                    total_bytes: file.size,
                }
            });
        self.aggregates.insert(entry.id.clone(), aggregate);
    }

    /// Aggregate of the subtree rooted at a node.
    pub fn aggregate(&self, selection: &EntrySelection) -> TreeResult<Aggregate> {
        let entry = &self.entries[self.course_index(selection.course_id())?];
        match selection {
            EntrySelection::Course { course_id } => Ok(self
                .aggregates
                .get(course_id)
                .copied()
                .unwrap_or_default()),
            EntrySelection::Tab { course_id, tab_id } => {
                entry.tab(tab_id).ok_or_else(|| TreeError::TabNotFound {
                    course_id: course_id.clone(),
                    tab_id: tab_id.clone(),
                })?;
                if entry.is_files_container(tab_id) {
                    Ok(entry
                        .files
                        .iter()
                        .filter(|file| file.selection().is_selected())
                        .fold(Aggregate::default(), |acc, file| {
                            acc + Aggregate {
                                selected_count: 1,
                                total_bytes: file.size,
                            }
                        }))
                } else {
                    // Non-file tabs carry no file leaves.
                    Ok(Aggregate::default())
                }
            }
            EntrySelection::File { course_id, file_id } => {
                let file = entry.file(file_id).ok_or_else(|| TreeError::FileNotFound {
                    course_id: course_id.clone(),
                    file_id: file_id.clone(),
                })?;
                Ok(if file.selection().is_selected() {
                    Aggregate {
                        selected_count: 1,
                        total_bytes: file.size,
                    }
                } else {
                    Aggregate::default()
                })
            }
        }
    }

    /// Sum of every course aggregate.
    pub fn aggregate_all(&self) -> Aggregate {
        self.aggregates
            .values()
            .fold(Aggregate::default(), |acc, aggregate| acc + *aggregate)
    }

    // =========================================================================
    // Rows
    // =========================================================================

    /// Visible rows in display order, honoring collapse flags.
    pub fn rows(&self) -> Vec<EntryRow> {
        let mut rows = Vec::new();
        for entry in &self.entries {
            rows.push(EntryRow::Course {
                course_id: entry.id.clone(),
            });
            if entry.is_collapsed {
                continue;
            }
            if entry.is_empty() {
                rows.push(EntryRow::Empty {
                    course_id: entry.id.clone(),
                });
                continue;
            }

            let container = entry.files_container();
            for (index, tab) in entry.tabs.iter().enumerate() {
                rows.push(EntryRow::Tab {
                    course_id: entry.id.clone(),
                    tab_id: tab.id.clone(),
                });
                if Some(index) == container && !tab.is_collapsed {
                    rows.extend(entry.files.iter().map(|file| EntryRow::File {
                        course_id: entry.id.clone(),
                        file_id: file.id.clone(),
                    }));
                }
            }
            if container.is_none() {
                rows.extend(entry.files.iter().map(|file| EntryRow::File {
                    course_id: entry.id.clone(),
                    file_id: file.id.clone(),
                }));
            }
        }
        rows
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Records describing the current state of every node of a course.
    pub fn records_for_course(&self, course_id: &str) -> TreeResult<Vec<SelectionRecord>> {
        let entry = &self.entries[self.course_index(course_id)?];
        let mut records = vec![SelectionRecord {
            key: SelectionKey::course(entry.id.as_str()),
            is_selected: entry.selection().is_selected(),
            is_collapsed: entry.is_collapsed,
        }];
        records.extend(entry.tabs.iter().map(|tab| SelectionRecord {
            key: SelectionKey::tab(entry.id.as_str(), tab.id.as_str()),
            is_selected: tab.selection().is_selected(),
            is_collapsed: tab.is_collapsed,
        }));
        records.extend(entry.files.iter().map(|file| SelectionRecord {
            key: SelectionKey::file(entry.id.as_str(), file.id.as_str()),
            is_selected: file.selection().is_selected(),
            is_collapsed: true,
        }));
        Ok(records)
    }

    /// Restore persisted state.
    ///
    /// Leaf selections and collapse flags are applied; container selections
    /// are recomputed. Records for nodes that no longer exist are ignored.
    pub fn apply_records<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a SelectionRecord>,
    {
        let mut touched = Vec::new();
        for record in records {
            let Ok(index) = self.course_index(&record.key.course_id) else {
                continue;
            };
            let entry = &mut self.entries[index];
            let state = SelectionState::from_selected(record.is_selected);
            match (&record.key.tab_id, &record.key.file_id) {
                (None, None) => entry.is_collapsed = record.is_collapsed,
                (Some(tab_id), _) => {
                    let leaf = !entry.is_files_container(tab_id);
                    if let Some(tab) = entry.tabs.iter_mut().find(|tab| &tab.id == tab_id) {
                        tab.is_collapsed = record.is_collapsed;
                        if leaf {
                            tab.selection = state;
                        }
                    }
                }
                (None, Some(file_id)) => {
                    if let Some(file) = entry.files.iter_mut().find(|file| &file.id == file_id) {
                        file.selection = state;
                    }
                }
            }
            if !touched.contains(&index) {
                touched.push(index);
            }
        }
        for index in touched {
            self.entries[index].roll_up();
            self.refresh_aggregate(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::entry::{SyncFile, SyncTab, TabKind};
    use proptest::prelude::*;

    fn catalog() -> Vec<SyncEntry> {
        vec![
            SyncEntry::new("1", "Biology")
                .with_tab(SyncTab::new("assignments", "Assignments", TabKind::Assignments))
                .with_tab(SyncTab::new("pages", "Pages", TabKind::Pages))
                .with_tab(SyncTab::new("files", "Files", TabKind::Files))
                .with_file(SyncFile::new("f1", "cell.pdf", 100, "https://x/f1"))
                .with_file(SyncFile::new("f2", "dna.pdf", 250, "https://x/f2")),
            SyncEntry::new("2", "History")
                .with_tab(SyncTab::new("grades", "Grades", TabKind::Grades)),
            SyncEntry::new("3", "Empty course"),
        ]
    }

    #[test]
    fn test_course_cascade_and_aggregate() {
        let mut tree = SyncTree::new(catalog());

        tree.toggle_selection(&EntrySelection::course("1"), SelectionState::Selected)
            .unwrap();

        let entry = tree.entry("1").unwrap();
        assert_eq!(entry.selection(), SelectionState::Selected);
        assert!(entry.tabs.iter().all(|t| t.selection().is_selected()));
        assert_eq!(
            tree.aggregate(&EntrySelection::course("1")).unwrap(),
            Aggregate {
                selected_count: 2,
                total_bytes: 350
            }
        );
        assert_eq!(
            tree.aggregate(&EntrySelection::tab("1", "assignments")).unwrap(),
            Aggregate::default()
        );
        assert_eq!(
            tree.aggregate(&EntrySelection::tab("1", "files")).unwrap(),
            Aggregate {
                selected_count: 2,
                total_bytes: 350
            }
        );
    }

    #[test]
    fn test_selecting_non_file_tab_adds_no_files() {
        let mut tree = SyncTree::new(catalog());

        tree.toggle_selection(&EntrySelection::tab("1", "assignments"), SelectionState::Selected)
            .unwrap();
        tree.toggle_selection(&EntrySelection::course("2"), SelectionState::Selected)
            .unwrap();

        assert_eq!(
            tree.entry("1").unwrap().selection(),
            SelectionState::PartiallySelected
        );
        assert_eq!(
            tree.entry("2").unwrap().selection(),
            SelectionState::Selected
        );
        assert_eq!(tree.aggregate_all(), Aggregate::default());
    }

    #[test]
    fn test_partial_selection_is_rejected() {
        let mut tree = SyncTree::new(catalog());
        assert_eq!(
            tree.toggle_selection(
                &EntrySelection::course("1"),
                SelectionState::PartiallySelected
            ),
            Err(TreeError::InvalidSelection(SelectionState::PartiallySelected))
        );
    }

    #[test]
    fn test_unknown_nodes() {
        let mut tree = SyncTree::new(catalog());
        assert_eq!(
            tree.toggle_selection(&EntrySelection::course("9"), SelectionState::Selected),
            Err(TreeError::CourseNotFound("9".to_string()))
        );
        assert!(matches!(
            tree.toggle_selection(&EntrySelection::file("1", "nope"), SelectionState::Selected),
            Err(TreeError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_course_never_selected() {
        let mut tree = SyncTree::new(catalog());

        tree.select_all(true);
        tree.toggle_selection(&EntrySelection::course("3"), SelectionState::Selected)
            .unwrap();

        assert_eq!(tree.entry("3").unwrap().selection(), SelectionState::Deselected);
        assert!(tree.is_everything_selected());
    }

    #[test]
    fn test_is_everything_selected() {
        let mut tree = SyncTree::new(catalog());
        assert!(!tree.is_everything_selected());

        tree.toggle_selection(&EntrySelection::course("1"), SelectionState::Selected)
            .unwrap();
        assert!(!tree.is_everything_selected());

        tree.toggle_selection(&EntrySelection::tab("2", "grades"), SelectionState::Selected)
            .unwrap();
        assert!(tree.is_everything_selected());

        assert!(!SyncTree::new(vec![SyncEntry::new("3", "Empty")]).is_everything_selected());
    }

    #[test]
    fn test_rows_follow_collapse_flags() {
        let mut tree = SyncTree::new(catalog());
        assert_eq!(tree.rows().len(), 3);

        tree.toggle_collapse(&EntrySelection::course("1")).unwrap();
        assert_eq!(tree.rows().len(), 6);

        tree.toggle_collapse(&EntrySelection::tab("1", "files")).unwrap();
        assert_eq!(tree.rows().len(), 8);

        tree.set_collapsed(&EntrySelection::course("3"), false).unwrap();
        let rows = tree.rows();
        assert_eq!(
            rows.last(),
            Some(&EntryRow::Empty {
                course_id: "3".to_string()
            })
        );
        assert_eq!(rows.last().unwrap().id(), "course-3-empty");
    }

    #[test]
    fn test_files_cannot_collapse() {
        let mut tree = SyncTree::new(catalog());
        assert!(matches!(
            tree.toggle_collapse(&EntrySelection::file("1", "f1")),
            Err(TreeError::NotCollapsible(_))
        ));
    }

    #[test]
    fn test_records_round_trip() {
        let mut tree = SyncTree::new(catalog());
        tree.toggle_selection(&EntrySelection::file("1", "f2"), SelectionState::Selected)
            .unwrap();
        tree.set_collapsed(&EntrySelection::course("1"), false).unwrap();
        let records = tree.records_for_course("1").unwrap();

        let mut restored = SyncTree::new(catalog());
        restored.apply_records(&records);

        let entry = restored.entry("1").unwrap();
        assert!(!entry.is_collapsed);
        assert_eq!(entry.selection(), SelectionState::PartiallySelected);
        assert_eq!(
            entry.tab("files").unwrap().selection(),
            SelectionState::PartiallySelected
        );
        assert_eq!(restored.aggregate_all().total_bytes, 250);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Course(usize, bool),
        Tab(usize, usize, bool),
        File(usize, usize, bool),
        All(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, any::<bool>()).prop_map(|(c, s)| Op::Course(c, s)),
            (0usize..3, 0usize..3, any::<bool>()).prop_map(|(c, t, s)| Op::Tab(c, t, s)),
            (0usize..3, 0usize..2, any::<bool>()).prop_map(|(c, f, s)| Op::File(c, f, s)),
            any::<bool>().prop_map(Op::All),
        ]
    }

    fn apply(tree: &mut SyncTree, op: &Op) {
        match op {
            Op::Course(c, s) => {
                let id = tree.entries()[*c].id.clone();
                tree.toggle_selection(&EntrySelection::course(id), SelectionState::from_selected(*s))
                    .unwrap();
            }
            Op::Tab(c, t, s) => {
                let entry = &tree.entries()[*c];
                if let Some(tab) = entry.tabs.get(*t) {
                    let selection = EntrySelection::tab(entry.id.clone(), tab.id.clone());
                    tree.toggle_selection(&selection, SelectionState::from_selected(*s))
                        .unwrap();
                }
            }
            Op::File(c, f, s) => {
                let entry = &tree.entries()[*c];
                if let Some(file) = entry.files.get(*f) {
                    let selection = EntrySelection::file(entry.id.clone(), file.id.clone());
                    tree.toggle_selection(&selection, SelectionState::from_selected(*s))
                        .unwrap();
                }
            }
            Op::All(s) => tree.select_all(*s),
        }
    }

    proptest! {
        #[test]
        fn containers_always_match_their_leaves(ops in prop::collection::vec(op(), 0..40)) {
            let mut tree = SyncTree::new(catalog());
            for op in &ops {
                apply(&mut tree, op);
            }

            for entry in tree.entries() {
                prop_assert_eq!(entry.selection(), SelectionState::roll_up(entry.leaf_states()));
                if let Some(index) = entry.files_container() {
                    prop_assert_eq!(
                        entry.tabs[index].selection(),
                        SelectionState::roll_up(entry.files.iter().map(|f| f.selection()))
                    );
                }
                let selected_files: Vec<&SyncFile> =
                    entry.files.iter().filter(|f| f.selection().is_selected()).collect();
                let aggregate = tree.aggregate(&EntrySelection::course(entry.id.clone())).unwrap();
                prop_assert_eq!(aggregate.selected_count, selected_files.len());
                prop_assert_eq!(
                    aggregate.total_bytes,
                    selected_files.iter().map(|f| f.size).sum::<u64>()
                );
            }
            prop_assert_eq!(tree.entry("3").unwrap().selection(), SelectionState::Deselected);
        }

        #[test]
        fn select_then_deselect_clears_every_leaf(ops in prop::collection::vec(op(), 0..20), course in 0usize..3) {
            let mut tree = SyncTree::new(catalog());
            for op in &ops {
                apply(&mut tree, op);
            }
            let id = tree.entries()[course].id.clone();

            tree.toggle_selection(&EntrySelection::course(id.clone()), SelectionState::Selected).unwrap();
            tree.toggle_selection(&EntrySelection::course(id.clone()), SelectionState::Deselected).unwrap();

            let entry = tree.entry(&id).unwrap();
            prop_assert!(entry.leaf_states().all(|s| s == SelectionState::Deselected));
            prop_assert_eq!(tree.aggregate(&EntrySelection::course(id)).unwrap(), Aggregate::default());
        }

        #[test]
        fn single_file_toggle_changes_count_by_one(ops in prop::collection::vec(op(), 0..20), file in 0usize..2) {
            let mut tree = SyncTree::new(catalog());
            for op in &ops {
                apply(&mut tree, op);
            }
            let before = tree.aggregate_all();
            let was_selected = tree.entry("1").unwrap().files[file].selection().is_selected();
            let file_id = tree.entry("1").unwrap().files[file].id.clone();

            tree.toggle_selection(&EntrySelection::file("1", file_id), SelectionState::from_selected(!was_selected)).unwrap();

            let after = tree.aggregate_all();
            let delta = after.selected_count as i64 - before.selected_count as i64;
            prop_assert_eq!(delta, if was_selected { -1 } else { 1 });
        }
    }
}
