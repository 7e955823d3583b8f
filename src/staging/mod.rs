//! Pending-operations staging
//!
//! Users queue deletes, moves, copies, creations and renames instead of
//! applying them immediately. The queue renders as an overlay on directory
//! listings (suppressed sources, renamed labels, virtual destination
//! entries) and is replayed against a provider on [`PendingOperations::commit`].
//! Until then nothing on the backend changes.

pub mod commit;
pub mod operation;
pub mod overlay;

use tracing::debug;

pub use commit::{CommitOutcome, CommitReport};
pub use operation::{PendingAction, PendingOperation, PendingState, StageRequest, StagingError};
pub use overlay::{is_virtual, EntryState, OverlayEntry, VirtualEntry, VirtualOrigin};

use crate::provider::{Entry, EntryType};
use operation::check_conflicts;

/// FIFO queue of pending operations
#[derive(Debug, Clone, Default)]
pub struct PendingOperations {
    ops: Vec<PendingOperation>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append one request, returning the operation id
    pub fn queue(&mut self, request: StageRequest) -> Result<String, StagingError> {
        let op = request.resolve()?;
        check_conflicts(&self.ops, &op)?;
        debug!(
            "Queued pending {} {} ({})",
            op.action.kind(),
            op.entry.path,
            op.id
        );
        let id = op.id.clone();
        self.ops.push(op);
        Ok(id)
    }

    pub fn queue_create(
        &mut self,
        path: &str,
        entry_type: EntryType,
    ) -> Result<String, StagingError> {
        self.queue(StageRequest::Create {
            path: path.to_string(),
            entry_type,
        })
    }

    pub fn queue_delete(&mut self, entry: &Entry) -> Result<String, StagingError> {
        self.queue(StageRequest::Delete {
            entry: entry.clone(),
        })
    }

    /// Move `entry` into `destination_dir`, keeping its name
    pub fn queue_move(
        &mut self,
        entry: &Entry,
        destination_dir: &str,
    ) -> Result<String, StagingError> {
        self.queue(StageRequest::Move {
            entry: entry.clone(),
            destination_dir: destination_dir.to_string(),
        })
    }

    /// Copy `entry` into `destination_dir`, keeping its name
    pub fn queue_copy(
        &mut self,
        entry: &Entry,
        destination_dir: &str,
    ) -> Result<String, StagingError> {
        self.queue(StageRequest::Copy {
            entry: entry.clone(),
            destination_dir: destination_dir.to_string(),
        })
    }

    pub fn queue_rename(&mut self, entry: &Entry, new_name: &str) -> Result<String, StagingError> {
        self.queue(StageRequest::Rename {
            entry: entry.clone(),
            new_name: new_name.to_string(),
        })
    }

    /// Queue several requests at once. Either all are queued or, on the
    /// first invalid one, none are.
    pub fn queue_batch(
        &mut self,
        requests: impl IntoIterator<Item = StageRequest>,
    ) -> Result<Vec<String>, StagingError> {
        let mut staged = self.clone();
        let ids = requests
            .into_iter()
            .map(|request| staged.queue(request))
            .collect::<Result<Vec<_>, _>>()?;
        *self = staged;
        Ok(ids)
    }

    /// Remove a single queued operation
    pub fn unqueue(&mut self, id: &str) -> Option<PendingOperation> {
        let idx = self.ops.iter().position(|op| op.id == id)?;
        let mut op = self.ops.remove(idx);
        op.state = PendingState::Discarded;
        Some(op)
    }

    pub fn get(&self, id: &str) -> Option<&PendingOperation> {
        self.ops.iter().find(|op| op.id == id)
    }

    /// Queued operations in commit order
    pub fn operations(&self) -> &[PendingOperation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drop every queued operation without touching any provider
    pub fn discard(&mut self) -> Vec<PendingOperation> {
        let mut discarded = std::mem::take(&mut self.ops);
        for op in &mut discarded {
            op.state = PendingState::Discarded;
        }
        debug!("Discarded {} pending operation(s)", discarded.len());
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryProvider;
    use crate::transfer::BatchOptions;
    use bytes::Bytes;

    #[test]
    fn test_queue_order_and_unqueue() {
        let mut pending = PendingOperations::new();
        let first = pending.queue_delete(&Entry::file("a.txt", 1)).unwrap();
        let second = pending.queue_rename(&Entry::file("b.txt", 1), "c.txt").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.operations()[0].id, first);
        assert_eq!(pending.get(&second).map(|op| op.action.kind()), Some("rename"));

        let removed = pending.unqueue(&first).unwrap();
        assert_eq!(removed.state, PendingState::Discarded);
        assert_eq!(pending.len(), 1);
        assert!(pending.unqueue(&first).is_none());
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut pending = PendingOperations::new();
        let entry = Entry::file("a.txt", 1);
        pending.queue_delete(&entry).unwrap();
        assert_eq!(
            pending.queue_move(&entry, "other"),
            Err(StagingError::DuplicateSource("a.txt".into()))
        );
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_child_of_deleted_dir_cannot_move() {
        let mut pending = PendingOperations::new();
        pending.queue_delete(&Entry::directory("dir")).unwrap();

        let err = pending
            .queue_move(&Entry::file("dir/keep.txt", 1), "other")
            .unwrap_err();
        assert_eq!(err, StagingError::DuplicateSource("dir/keep.txt".into()));
        assert!(pending.get_virtual_entries("other").is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut pending = PendingOperations::new();
        let result = pending.queue_batch(vec![
            StageRequest::Delete {
                entry: Entry::file("a.txt", 1),
            },
            StageRequest::Move {
                entry: Entry::directory("dir"),
                destination_dir: "dir/sub".into(),
            },
        ]);
        assert!(matches!(result, Err(StagingError::IntoItself { .. })));
        assert!(pending.is_empty());

        let ids = pending
            .queue_batch(vec![
                StageRequest::Delete {
                    entry: Entry::file("a.txt", 1),
                },
                StageRequest::Copy {
                    entry: Entry::directory("dir"),
                    destination_dir: "backup".into(),
                },
            ])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_discard_makes_no_calls() {
        let provider = MemoryProvider::new();
        provider.insert_file("a.txt", Bytes::from_static(b"a"));

        let mut pending = PendingOperations::new();
        pending.queue_delete(&Entry::file("a.txt", 1)).unwrap();
        pending.queue_copy(&Entry::file("b.txt", 1), "backup").unwrap();
        pending.queue_create("backup/notes", EntryType::Directory).unwrap();

        let discarded = pending.discard();
        assert_eq!(discarded.len(), 3);
        assert!(discarded.iter().all(|op| op.state == PendingState::Discarded));
        assert!(pending.is_empty());
        assert!(pending.get_virtual_entries("backup").is_empty());
        assert!(pending.get_virtual_entries("").is_empty());
        assert_eq!(pending.get_entry_state(&Entry::file("a.txt", 1)), EntryState::default());

        let report = pending.commit(&provider, &BatchOptions::new()).await;
        assert!(report.outcomes.is_empty());
        assert!(provider.calls().is_empty());
        assert!(provider.contains("a.txt"));
    }
}
