//! OxideTerm Storage - unified storage provider layer
//!
//! Lets the file browser list, read, write, delete, move, copy, upload and
//! download against heterogeneous backends (local disk, SFTP, object stores)
//! through one async interface, without knowing which primitives the active
//! backend supports natively.
//!
//! # Layout
//! - [`provider`]: entry/capability/result model, provider contract, fallback
//!   dispatcher and connection single-flight
//! - [`transfer`]: retry/backoff, chunked uploads, progress, cancellation and
//!   recursive directory transfers
//! - [`providers`]: concrete backends and the profile-driven factory
//! - [`staging`]: pending-operations queue with virtual overlay entries
//! - [`config`]: storage settings and connection profiles

pub mod config;
pub mod listing;
pub mod logging;
pub mod path_utils;
pub mod provider;
pub mod providers;
pub mod staging;
pub mod transfer;

pub use config::{ConfigStorage, Profile, StorageConfig};
pub use provider::{
    Capability, CapabilitySet, Entry, EntryType, ErrorKind, OperationResult, OperationResultExt,
    ProviderError, ProviderExt, ProviderType, StorageProvider,
};
pub use providers::{create_provider, ProviderDeps};
pub use staging::{CommitReport, EntryState, PendingOperations, VirtualEntry};
pub use transfer::{
    BatchProgress, ChunkedUploader, ChunkingConfig, RetryPolicy, Retrier, TransferControl,
    TransferProgress,
};
