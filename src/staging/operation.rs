//! Pending operation model and queue validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_utils::{as_directory_path, is_same_or_descendant, join_path, path_key, with_file_name};
use crate::provider::{Entry, EntryType};

/// Validation failures when queueing an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StagingError {
    #[error("{0} already has a pending operation")]
    DuplicateSource(String),

    #[error("Cannot move or copy {path} into itself ({destination})")]
    IntoItself { path: String, destination: String },

    #[error("{0} is already at the destination")]
    SameLocation(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("{0} is already the target of a pending operation")]
    DestinationConflict(String),

    #[error("{path} lies under {source_path}, which has a pending delete or move")]
    UnderPendingSource { path: String, source_path: String },
}

/// What a pending operation will do once committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingAction {
    Create {
        path: String,
        entry_type: EntryType,
    },
    Delete {
        path: String,
        recursive: bool,
    },
    /// `destination` is the full target path
    Move {
        source: String,
        destination: String,
    },
    Copy {
        source: String,
        destination: String,
    },
    Rename {
        path: String,
        new_name: String,
    },
}

impl PendingAction {
    /// Path of the existing entry this action acts on (`None` for create)
    pub fn source(&self) -> Option<&str> {
        match self {
            PendingAction::Create { .. } => None,
            PendingAction::Delete { path, .. } | PendingAction::Rename { path, .. } => Some(path),
            PendingAction::Move { source, .. } | PendingAction::Copy { source, .. } => Some(source),
        }
    }

    /// Path that will exist after commit, if any
    pub fn target(&self) -> Option<String> {
        match self {
            PendingAction::Create { path, .. } => Some(path.clone()),
            PendingAction::Delete { .. } => None,
            PendingAction::Move { destination, .. } | PendingAction::Copy { destination, .. } => {
                Some(destination.clone())
            }
            PendingAction::Rename { path, new_name } => Some(with_file_name(path, new_name)),
        }
    }

    /// Removes or relocates its source
    pub fn mutates_source(&self) -> bool {
        matches!(
            self,
            PendingAction::Delete { .. } | PendingAction::Move { .. } | PendingAction::Rename { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingAction::Create { .. } => "create",
            PendingAction::Delete { .. } => "delete",
            PendingAction::Move { .. } => "move",
            PendingAction::Copy { .. } => "copy",
            PendingAction::Rename { .. } => "rename",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    Queued,
    Committed,
    Discarded,
}

/// A queued, not-yet-committed mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,
    pub action: PendingAction,
    /// Snapshot of the entry the action was requested on. For creates this
    /// is the entry that will be created.
    pub entry: Entry,
    pub state: PendingState,
    pub queued_at: DateTime<Utc>,
}

impl PendingOperation {
    pub(crate) fn new(action: PendingAction, entry: Entry) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            entry,
            state: PendingState::Queued,
            queued_at: Utc::now(),
        }
    }
}

/// A user request, resolved into a [`PendingAction`] when queued
#[derive(Debug, Clone)]
pub enum StageRequest {
    Create { path: String, entry_type: EntryType },
    Delete { entry: Entry },
    /// Move `entry` into the directory `destination_dir`
    Move { entry: Entry, destination_dir: String },
    Copy { entry: Entry, destination_dir: String },
    Rename { entry: Entry, new_name: String },
}

fn validate_name(name: &str) -> Result<(), StagingError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StagingError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn landing_path(entry: &Entry, destination_dir: &str) -> String {
    let path = join_path(&as_directory_path(destination_dir), &entry.name);
    if entry.is_directory() {
        as_directory_path(&path)
    } else {
        path
    }
}

fn transfer_action(
    entry: &Entry,
    destination_dir: &str,
    is_move: bool,
) -> Result<PendingAction, StagingError> {
    let destination = landing_path(entry, destination_dir);
    if path_key(&destination) == entry.key() {
        return Err(StagingError::SameLocation(entry.path.clone()));
    }
    if entry.is_directory() && is_same_or_descendant(&destination, &entry.path) {
        return Err(StagingError::IntoItself {
            path: entry.path.clone(),
            destination,
        });
    }
    let source = entry.path.clone();
    Ok(if is_move {
        PendingAction::Move {
            source,
            destination,
        }
    } else {
        PendingAction::Copy {
            source,
            destination,
        }
    })
}

impl StageRequest {
    /// Resolve into an operation, checking only the request itself
    pub(crate) fn resolve(self) -> Result<PendingOperation, StagingError> {
        let (action, entry) = match self {
            StageRequest::Create { path, entry_type } => {
                let entry = Entry::new(entry_type, path);
                validate_name(&entry.name)?;
                (
                    PendingAction::Create {
                        path: entry.path.clone(),
                        entry_type,
                    },
                    entry,
                )
            }
            StageRequest::Delete { entry } => (
                PendingAction::Delete {
                    path: entry.path.clone(),
                    recursive: entry.is_directory(),
                },
                entry,
            ),
            StageRequest::Move {
                entry,
                destination_dir,
            } => (transfer_action(&entry, &destination_dir, true)?, entry),
            StageRequest::Copy {
                entry,
                destination_dir,
            } => (transfer_action(&entry, &destination_dir, false)?, entry),
            StageRequest::Rename { entry, new_name } => {
                validate_name(&new_name)?;
                if new_name == entry.name {
                    return Err(StagingError::SameLocation(entry.path.clone()));
                }
                (
                    PendingAction::Rename {
                        path: entry.path.clone(),
                        new_name,
                    },
                    entry,
                )
            }
        };
        Ok(PendingOperation::new(action, entry))
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    is_same_or_descendant(a, b) || is_same_or_descendant(b, a)
}

/// Check `op` against the operations already queued.
///
/// Sources conflict when one contains the other and either operation
/// removes or relocates its source. Nothing may land under a source that is
/// about to be deleted, moved or renamed.
pub(crate) fn check_conflicts(
    queued: &[PendingOperation],
    op: &PendingOperation,
) -> Result<(), StagingError> {
    if let Some(source) = op.action.source() {
        let clash = queued.iter().any(|other| {
            other
                .action
                .source()
                .map(|other_source| overlaps(source, other_source))
                .unwrap_or(false)
                && (op.action.mutates_source() || other.action.mutates_source())
        });
        if clash {
            return Err(StagingError::DuplicateSource(source.to_string()));
        }
    }

    if let Some(target) = op.action.target() {
        let taken = queued
            .iter()
            .filter_map(|other| other.action.target())
            .any(|other| path_key(&other) == path_key(&target));
        if taken {
            return Err(StagingError::DestinationConflict(target));
        }

        let doomed = queued
            .iter()
            .filter(|other| other.action.mutates_source())
            .filter_map(|other| other.action.source())
            .find(|other_source| is_same_or_descendant(&target, other_source));
        if let Some(other_source) = doomed {
            return Err(StagingError::UnderPendingSource {
                path: target,
                source_path: other_source.to_string(),
            });
        }
    }

    if op.action.mutates_source() {
        if let Some(source) = op.action.source() {
            let landed = queued
                .iter()
                .filter_map(|other| other.action.target())
                .find(|other_target| is_same_or_descendant(other_target, source));
            if let Some(other_target) = landed {
                return Err(StagingError::UnderPendingSource {
                    path: other_target,
                    source_path: source.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_lands_in_destination_dir() {
        let op = StageRequest::Move {
            entry: Entry::directory("photos/2024"),
            destination_dir: "archive".into(),
        }
        .resolve()
        .unwrap();
        assert_eq!(
            op.action,
            PendingAction::Move {
                source: "photos/2024/".into(),
                destination: "archive/2024/".into(),
            }
        );
        assert_eq!(op.state, PendingState::Queued);
    }

    #[test]
    fn test_request_validation() {
        let into_self = StageRequest::Copy {
            entry: Entry::directory("a"),
            destination_dir: "a/b".into(),
        }
        .resolve();
        assert!(matches!(into_self, Err(StagingError::IntoItself { .. })));

        let same = StageRequest::Move {
            entry: Entry::file("docs/x.txt", 1),
            destination_dir: "docs/".into(),
        }
        .resolve();
        assert_eq!(same.err(), Some(StagingError::SameLocation("docs/x.txt".into())));

        for bad in ["", "..", "a/b"] {
            let rename = StageRequest::Rename {
                entry: Entry::file("x.txt", 1),
                new_name: bad.into(),
            }
            .resolve();
            assert!(matches!(rename, Err(StagingError::InvalidName(_))));
        }
    }

    #[test]
    fn test_sibling_prefix_is_not_descendant() {
        let op = StageRequest::Move {
            entry: Entry::directory("a"),
            destination_dir: "ab".into(),
        }
        .resolve();
        assert!(op.is_ok());
    }

    #[test]
    fn test_conflicts() {
        let delete = StageRequest::Delete {
            entry: Entry::file("x.txt", 1),
        }
        .resolve()
        .unwrap();
        let queued = vec![delete];

        let rename = StageRequest::Rename {
            entry: Entry::file("x.txt", 1),
            new_name: "y.txt".into(),
        }
        .resolve()
        .unwrap();
        assert!(matches!(
            check_conflicts(&queued, &rename),
            Err(StagingError::DuplicateSource(_))
        ));

        let copy_a = StageRequest::Copy {
            entry: Entry::file("z.txt", 1),
            destination_dir: "out".into(),
        }
        .resolve()
        .unwrap();
        let copy_b = StageRequest::Copy {
            entry: Entry::file("z.txt", 1),
            destination_dir: "backup".into(),
        }
        .resolve()
        .unwrap();
        assert!(check_conflicts(&[copy_a.clone()], &copy_b).is_ok());

        let create = StageRequest::Create {
            path: "out/z.txt".into(),
            entry_type: EntryType::File,
        }
        .resolve()
        .unwrap();
        assert!(matches!(
            check_conflicts(&[copy_a], &create),
            Err(StagingError::DestinationConflict(_))
        ));
    }

    #[test]
    fn test_nested_sources_and_targets_conflict() {
        let delete_dir = StageRequest::Delete {
            entry: Entry::directory("dir"),
        }
        .resolve()
        .unwrap();
        let queued = vec![delete_dir];

        let move_child = StageRequest::Move {
            entry: Entry::file("dir/keep.txt", 1),
            destination_dir: "other".into(),
        }
        .resolve()
        .unwrap();
        assert_eq!(
            check_conflicts(&queued, &move_child),
            Err(StagingError::DuplicateSource("dir/keep.txt".into()))
        );

        let create_inside = StageRequest::Create {
            path: "dir/new.txt".into(),
            entry_type: EntryType::File,
        }
        .resolve()
        .unwrap();
        assert!(matches!(
            check_conflicts(&queued, &create_inside),
            Err(StagingError::UnderPendingSource { .. })
        ));

        // a copy landing in a directory that is deleted afterwards
        let copy_in = StageRequest::Copy {
            entry: Entry::file("z.txt", 1),
            destination_dir: "out".into(),
        }
        .resolve()
        .unwrap();
        let delete_out = StageRequest::Delete {
            entry: Entry::directory("out"),
        }
        .resolve()
        .unwrap();
        assert!(matches!(
            check_conflicts(&[copy_in], &delete_out),
            Err(StagingError::UnderPendingSource { .. })
        ));
    }
}
