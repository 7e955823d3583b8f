//! Listing overlay derived from the pending queue
//!
//! Nothing here touches a provider. Every value is recomputed from the
//! current queue, so the overlay is always consistent with it.

use serde::Serialize;

use super::operation::{PendingAction, PendingOperation};
use super::PendingOperations;
use crate::path_utils::{is_same_or_descendant, parent_path, path_key};
use crate::provider::Entry;

/// Display state of a real entry under the pending queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryState {
    pub is_deleted: bool,
    pub is_moved_away: bool,
    pub is_renamed: bool,
    pub new_name: Option<String>,
}

impl EntryState {
    /// Entry should be dimmed or hidden
    pub fn is_suppressed(&self) -> bool {
        self.is_deleted || self.is_moved_away
    }
}

/// Where a virtual entry comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VirtualOrigin {
    Created,
    Moved { source: String },
    Copied { source: String },
}

/// Display-only entry for a pending destination. Never returned by a
/// provider; `entry.id` starts with `pending:` and `entry.metadata.pending`
/// is set.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualEntry {
    pub entry: Entry,
    pub operation_id: String,
    pub origin: VirtualOrigin,
}

pub const VIRTUAL_ID_PREFIX: &str = "pending:";

impl VirtualEntry {
    fn from_operation(op: &PendingOperation) -> Option<Self> {
        let (mut entry, origin) = match &op.action {
            PendingAction::Create { .. } => (op.entry.clone(), VirtualOrigin::Created),
            PendingAction::Move {
                source,
                destination,
            } => (
                op.entry.relocated(destination),
                VirtualOrigin::Moved {
                    source: source.clone(),
                },
            ),
            PendingAction::Copy {
                source,
                destination,
            } => (
                op.entry.relocated(destination),
                VirtualOrigin::Copied {
                    source: source.clone(),
                },
            ),
            PendingAction::Delete { .. } | PendingAction::Rename { .. } => return None,
        };
        entry.id = format!("{}{}", VIRTUAL_ID_PREFIX, op.id);
        entry.metadata.pending = true;
        Some(Self {
            entry,
            operation_id: op.id.clone(),
            origin,
        })
    }
}

/// True when `entry` carries the pending marker
pub fn is_virtual(entry: &Entry) -> bool {
    entry.metadata.pending || entry.id.starts_with(VIRTUAL_ID_PREFIX)
}

/// One row of an overlaid listing
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OverlayEntry {
    Real { entry: Entry, state: EntryState },
    Virtual(VirtualEntry),
}

impl OverlayEntry {
    pub fn entry(&self) -> &Entry {
        match self {
            OverlayEntry::Real { entry, .. } => entry,
            OverlayEntry::Virtual(v) => &v.entry,
        }
    }
}

fn same_dir(path: &str, dir: &str) -> bool {
    path_key(&parent_path(path)) == path_key(dir)
}

impl PendingOperations {
    /// How `entry` should be displayed given the queued operations.
    ///
    /// Deletes and moves of a directory also cover its descendants.
    pub fn get_entry_state(&self, entry: &Entry) -> EntryState {
        let mut state = EntryState::default();
        for op in &self.ops {
            match &op.action {
                PendingAction::Delete { path, .. } if is_same_or_descendant(&entry.path, path) => {
                    state.is_deleted = true;
                }
                PendingAction::Move { source, .. } if is_same_or_descendant(&entry.path, source) => {
                    state.is_moved_away = true;
                }
                PendingAction::Rename { path, new_name } if path_key(path) == entry.key() => {
                    state.is_renamed = true;
                    state.new_name = Some(new_name.clone());
                }
                _ => {}
            }
        }
        state
    }

    /// Virtual entries landing directly inside `dir`, in queue order
    pub fn get_virtual_entries(&self, dir: &str) -> Vec<VirtualEntry> {
        self.ops
            .iter()
            .filter(|op| {
                op.action
                    .target()
                    .map(|target| same_dir(&target, dir))
                    .unwrap_or(false)
            })
            .filter_map(VirtualEntry::from_operation)
            .collect()
    }

    /// Real entries with their display state, followed by the virtual
    /// entries for `dir`
    pub fn overlay(&self, dir: &str, real_entries: &[Entry]) -> Vec<OverlayEntry> {
        let mut rows: Vec<OverlayEntry> = real_entries
            .iter()
            .map(|entry| OverlayEntry::Real {
                entry: entry.clone(),
                state: self.get_entry_state(entry),
            })
            .collect();
        rows.extend(
            self.get_virtual_entries(dir)
                .into_iter()
                .map(OverlayEntry::Virtual),
        );
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EntryType;

    #[test]
    fn test_entry_state() {
        let mut pending = PendingOperations::new();
        let photos = Entry::directory("photos");
        let notes = Entry::file("notes.txt", 10);
        let report = Entry::file("docs/report.pdf", 100);

        pending.queue_delete(&photos).unwrap();
        pending.queue_rename(&notes, "todo.txt").unwrap();
        pending.queue_move(&report, "archive").unwrap();

        assert!(pending.get_entry_state(&photos).is_deleted);
        assert!(pending.get_entry_state(&Entry::file("photos/cat.jpg", 1)).is_deleted);
        assert!(!pending.get_entry_state(&Entry::file("photos2/cat.jpg", 1)).is_deleted);

        let renamed = pending.get_entry_state(&notes);
        assert!(renamed.is_renamed);
        assert_eq!(renamed.new_name.as_deref(), Some("todo.txt"));
        assert!(!renamed.is_suppressed());

        let moved = pending.get_entry_state(&report);
        assert!(moved.is_moved_away);
        assert!(moved.is_suppressed());
    }

    #[test]
    fn test_virtual_entries_are_marked() {
        let mut pending = PendingOperations::new();
        let report = Entry::file("docs/report.pdf", 100);
        let op_id = pending.queue_copy(&report, "archive").unwrap();
        pending.queue_create("archive/2025", EntryType::Directory).unwrap();

        let virtuals = pending.get_virtual_entries("archive/");
        assert_eq!(virtuals.len(), 2);

        let copy = &virtuals[0];
        assert_eq!(copy.entry.path, "archive/report.pdf");
        assert_eq!(copy.entry.size, Some(100));
        assert_eq!(copy.entry.id, format!("pending:{}", op_id));
        assert!(copy.entry.metadata.pending);
        assert!(is_virtual(&copy.entry));
        assert!(!is_virtual(&report));
        assert_eq!(
            copy.origin,
            VirtualOrigin::Copied {
                source: "docs/report.pdf".into()
            }
        );

        assert_eq!(virtuals[1].entry.path, "archive/2025/");
        assert_eq!(virtuals[1].origin, VirtualOrigin::Created);

        assert!(pending.get_virtual_entries("docs").is_empty());
        assert!(pending.get_virtual_entries("").is_empty());
    }

    #[test]
    fn test_root_virtual_entries() {
        let mut pending = PendingOperations::new();
        pending.queue_move(&Entry::file("a/b.txt", 1), "").unwrap();
        assert_eq!(pending.get_virtual_entries("").len(), 1);
        assert_eq!(pending.get_virtual_entries("/").len(), 1);
    }

    #[test]
    fn test_overlay_appends_virtual_rows() {
        let mut pending = PendingOperations::new();
        let a = Entry::file("dir/a.txt", 1);
        let b = Entry::file("dir/b.txt", 2);
        pending.queue_delete(&a).unwrap();
        pending.queue_copy(&b, "dir/sub").unwrap();
        pending.queue_create("dir/new.txt", EntryType::File).unwrap();

        let rows = pending.overlay("dir", &[a.clone(), b.clone()]);
        assert_eq!(rows.len(), 3);
        match &rows[0] {
            OverlayEntry::Real { state, .. } => assert!(state.is_deleted),
            other => panic!("unexpected row {:?}", other),
        }
        match &rows[1] {
            OverlayEntry::Real { state, .. } => assert_eq!(*state, EntryState::default()),
            other => panic!("unexpected row {:?}", other),
        }
        assert!(matches!(rows[2], OverlayEntry::Virtual(_)));
        assert_eq!(rows[2].entry().path, "dir/new.txt");
    }
}
