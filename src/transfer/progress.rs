//! Transfer progress events

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Per-file byte progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Path of the file being transferred
    pub current_file: String,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64, current_file: impl Into<String>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
            current_file: current_file.into(),
        }
    }

    /// Calculate progress percentage (0-100).
    ///
    /// `round(transferred / total * 100)`, 0 when `total_bytes` is 0.
    pub fn percentage(&self) -> u8 {
        percentage(self.bytes_transferred, self.total_bytes)
    }
}

/// Per-entry progress of a directory-wide operation.
///
/// `current` is strictly increasing across events and never exceeds `total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based index of the entry just completed
    pub current: usize,
    /// Number of entries in the plan
    pub total: usize,
    pub current_file: String,
    /// Cumulative bytes across the batch
    pub bytes_transferred: u64,
}

impl BatchProgress {
    pub fn percentage(&self) -> u8 {
        percentage(self.current as u64, self.total as u64)
    }
}

pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;
pub type BatchProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

pub(crate) fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

pub(crate) fn emit(callback: Option<&ProgressCallback>, event: TransferProgress) {
    if let Some(cb) = callback {
        cb(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounds() {
        assert_eq!(TransferProgress::new(1, 3, "f").percentage(), 33);
        assert_eq!(TransferProgress::new(2, 3, "f").percentage(), 67);
        assert_eq!(TransferProgress::new(1024, 2048, "f").percentage(), 50);
        assert_eq!(TransferProgress::new(2048, 2048, "f").percentage(), 100);
    }

    #[test]
    fn test_zero_total_is_zero_percent() {
        assert_eq!(TransferProgress::new(0, 0, "empty").percentage(), 0);
        assert_eq!(TransferProgress::new(10, 0, "weird").percentage(), 0);
    }

    #[test]
    fn test_batch_percentage() {
        let p = BatchProgress {
            current: 1,
            total: 4,
            current_file: "a".into(),
            bytes_transferred: 0,
        };
        assert_eq!(p.percentage(), 25);
    }
}
