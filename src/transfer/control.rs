//! Cancellation control for long-running operations
//!
//! Batch operations check the control between per-entry iterations; a
//! single large transfer is not interrupted mid-flight.

use tokio::sync::watch;

use crate::provider::{OperationResult, ProviderError};

/// Cancellation signal shared between the caller and a running operation
#[derive(Debug)]
pub struct TransferControl {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Get a receiver for waiting on cancellation
    pub fn subscribe_cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Resolves once `cancel()` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe_cancellation();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender lives in self, so this cannot close while we hold &self
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Between-iteration check: `Cancelled` once the control has fired
pub fn check_cancelled(control: Option<&TransferControl>) -> OperationResult<()> {
    match control {
        Some(ctrl) if ctrl.is_cancelled() => {
            Err(ProviderError::cancelled("operation cancelled by user"))
        }
        _ => Ok(()),
    }
}
