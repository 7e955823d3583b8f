//! Replaying the pending queue against a provider

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use super::operation::{PendingAction, PendingOperation, PendingState};
use super::PendingOperations;
use crate::path_utils::with_file_name;
use crate::provider::{OperationResult, ProviderExt, StorageProvider};
use crate::transfer::{check_cancelled, BatchOptions};

/// Result of one committed operation
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub operation: PendingOperation,
    pub result: OperationResult<()>,
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-operation results of a commit, in queue order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub outcomes: Vec<CommitOutcome>,
    /// Commit stopped early; operations without an outcome are still queued
    pub cancelled: bool,
}

impl CommitReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &CommitOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CommitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(CommitOutcome::is_success)
    }
}

async fn execute(
    provider: &dyn StorageProvider,
    op: &PendingOperation,
    options: &BatchOptions,
) -> OperationResult<()> {
    match &op.action {
        PendingAction::Create { path, entry_type } => {
            if entry_type.is_directory_like() {
                provider.mkdir(path).await
            } else {
                provider.write(path, Bytes::new()).await
            }
        }
        PendingAction::Delete { path, recursive } => provider.delete(path, *recursive).await,
        PendingAction::Move { destination, .. } => {
            provider.move_entry(&op.entry, destination, options).await
        }
        PendingAction::Copy { destination, .. } => {
            provider.copy_entry(&op.entry, destination, options).await
        }
        PendingAction::Rename { path, new_name } => {
            let destination = with_file_name(path, new_name);
            provider.move_entry(&op.entry, &destination, options).await
        }
    }
}

impl PendingOperations {
    /// Replay queued operations in FIFO order.
    ///
    /// A failure does not undo earlier successes and does not stop later
    /// operations. Successful operations leave the queue; failed ones stay
    /// queued so the caller can retry them. Cancellation through
    /// `options.control` is checked before each operation; `options.chunking`
    /// applies to every body pulled through the client.
    pub async fn commit(
        &mut self,
        provider: &dyn StorageProvider,
        options: &BatchOptions,
    ) -> CommitReport {
        let queued: Vec<PendingOperation> = self.ops.clone();
        let mut report = CommitReport::default();

        info!(
            "Committing {} pending operation(s) to {}",
            queued.len(),
            provider.display_name()
        );

        for op in queued {
            if check_cancelled(options.control.as_deref()).is_err() {
                report.cancelled = true;
                break;
            }

            let result = execute(provider, &op, options).await;
            let mut operation = op;
            match &result {
                Ok(()) => {
                    self.ops.retain(|queued| queued.id != operation.id);
                    operation.state = PendingState::Committed;
                }
                Err(e) => {
                    warn!(
                        "Pending {} {} failed: {}",
                        operation.action.kind(),
                        operation.entry.path,
                        e
                    );
                }
            }
            report.outcomes.push(CommitOutcome { operation, result });
        }

        let failed = report.failed().count();
        if failed > 0 || report.cancelled {
            warn!(
                "Commit finished with {} failure(s){}, {} operation(s) still queued",
                failed,
                if report.cancelled { " (cancelled)" } else { "" },
                self.ops.len()
            );
        } else {
            info!("Commit finished: {} operation(s) applied", report.outcomes.len());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capability, CapabilitySet, Entry, EntryType, ErrorKind, ProviderError};
    use crate::providers::memory::MemoryProvider;
    use crate::transfer::{ChunkingConfig, TransferControl};
    use std::sync::Arc;

    fn seeded() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.insert_file("a.txt", Bytes::from_static(b"a"));
        provider.insert_file("src/b.txt", Bytes::from_static(b"b"));
        provider.insert_dir("dst");
        provider
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let provider = seeded();
        provider.fail_next("delete", "a.txt", ProviderError::permission_denied("a.txt"));

        let mut pending = PendingOperations::new();
        pending.queue_delete(&Entry::file("a.txt", 1)).unwrap();
        pending
            .queue_move(&Entry::file("src/b.txt", 1), "dst")
            .unwrap();

        let report = pending.commit(&provider, &BatchOptions::new()).await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.cancelled);
        assert!(!report.all_succeeded());

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].operation.entry.path, "a.txt");
        assert_eq!(
            failed[0].result.as_ref().err().map(|e| e.kind()),
            Some(ErrorKind::PermissionDenied)
        );
        assert_eq!(failed[0].operation.state, PendingState::Queued);

        let succeeded: Vec<_> = report.succeeded().collect();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].operation.state, PendingState::Committed);

        assert!(provider.contains("a.txt"));
        assert!(!provider.contains("src/b.txt"));
        assert!(provider.contains("dst/b.txt"));

        // only the failed delete is left for a retry
        assert_eq!(pending.len(), 1);
        let retry = pending.commit(&provider, &BatchOptions::new()).await;
        assert!(retry.all_succeeded());
        assert!(pending.is_empty());
        assert!(!provider.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let provider = seeded();
        let mut pending = PendingOperations::new();
        pending.queue_create("dst/new", EntryType::Directory).unwrap();
        pending
            .queue_copy(&Entry::file("src/b.txt", 1), "dst/new")
            .unwrap();
        pending.queue_rename(&Entry::file("a.txt", 1), "z.txt").unwrap();

        let report = pending.commit(&provider, &BatchOptions::new()).await;
        assert!(report.all_succeeded());
        assert_eq!(
            provider.calls(),
            vec![
                "mkdir dst/new/",
                "copy src/b.txt dst/new/b.txt",
                "move a.txt z.txt",
            ]
        );
        assert_eq!(
            provider.file_contents("dst/new/b.txt"),
            Some(Bytes::from_static(b"b"))
        );
        assert!(provider.contains("z.txt"));
    }

    #[tokio::test]
    async fn test_move_falls_back_without_native_move() {
        let provider = MemoryProvider::with_capabilities(
            [Capability::List, Capability::Read, Capability::Write, Capability::Delete]
                .into_iter()
                .collect::<CapabilitySet>(),
        );
        provider.insert_file("src/b.txt", Bytes::from_static(b"b"));

        let mut pending = PendingOperations::new();
        pending
            .queue_move(&Entry::file("src/b.txt", 1), "dst")
            .unwrap();
        let report = pending.commit(&provider, &BatchOptions::new()).await;

        assert!(report.all_succeeded());
        assert_eq!(
            provider.calls(),
            vec!["read src/b.txt", "write dst/b.txt", "delete src/b.txt"]
        );
    }

    #[tokio::test]
    async fn test_commit_uses_configured_chunking() {
        let provider = MemoryProvider::with_capabilities(
            [Capability::List, Capability::Read, Capability::Write, Capability::Delete]
                .into_iter()
                .collect::<CapabilitySet>(),
        );
        provider.insert_file("src/big.bin", Bytes::from_static(b"0123456789"));

        let mut pending = PendingOperations::new();
        pending
            .queue_move(&Entry::file("src/big.bin", 10), "dst")
            .unwrap();
        let options = BatchOptions::new().with_chunking(ChunkingConfig::new(8, 4));
        let report = pending.commit(&provider, &options).await;

        assert!(report.all_succeeded());
        assert_eq!(
            provider.calls(),
            vec![
                "read src/big.bin",
                "multipart_begin dst/big.bin",
                "multipart_part dst/big.bin 1",
                "multipart_part dst/big.bin 2",
                "multipart_part dst/big.bin 3",
                "multipart_complete dst/big.bin",
                "delete src/big.bin",
            ]
        );
        assert_eq!(
            provider.file_contents("dst/big.bin"),
            Some(Bytes::from_static(b"0123456789"))
        );
    }

    #[tokio::test]
    async fn test_cancel_before_commit() {
        let provider = seeded();
        let mut pending = PendingOperations::new();
        pending.queue_delete(&Entry::file("a.txt", 1)).unwrap();

        let control = Arc::new(TransferControl::new());
        control.cancel();
        let options = BatchOptions::new().with_control(control);
        let report = pending.commit(&provider, &options).await;

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(provider.calls().is_empty());
        assert_eq!(pending.len(), 1);
    }
}
