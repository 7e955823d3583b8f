//! Transfer machinery shared by all providers
//!
//! Retry/backoff, size-based chunked uploads, progress events, cancellation
//! and recursive directory transfers.

pub mod batch;
pub mod chunked;
pub mod control;
pub mod progress;
pub mod retry;

pub use batch::{BatchOptions, BatchSummary};
pub use chunked::{ChunkedUploader, ChunkingConfig, MultipartTarget, UploadMode, UploadPart};
pub use control::{check_cancelled, TransferControl};
pub use progress::{BatchProgress, BatchProgressCallback, ProgressCallback, TransferProgress};
pub use retry::{backoff_delay, Retrier, RetryPolicy, RetryPredicate};
