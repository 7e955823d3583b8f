//! Provider contract
//!
//! Every backend implements [`StorageProvider`]. Only `list`, `get_metadata`
//! and `read` are mandatory; every other primitive defaults to
//! `Unimplemented`. Composite `move`/`copy` are never implemented per
//! backend: [`ProviderExt`] routes them through the fallback
//! [`dispatch`]er against the provider's capability set.

pub mod capability;
pub mod connection;
pub mod dispatch;
pub mod error_map;
pub mod result;
pub mod types;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

pub use capability::{Capability, CapabilitySet, ProviderCapabilities};
pub use connection::{ConnectionGate, ConnectionState, SessionSlot};
pub use error_map::{map_io_error, ErrorMappingTable, ErrorRule};
pub use result::{ErrorKind, OperationResult, OperationResultExt, ProviderError};
pub use types::{Entry, EntryMetadata, EntryType, ProviderType};

use crate::transfer::{BatchOptions, BatchSummary, MultipartTarget};

/// Storage backend contract
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Human-readable label (e.g. `user@host:22`)
    fn display_name(&self) -> String;

    /// Snapshot of the current capability set
    fn capabilities(&self) -> CapabilitySet;

    fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities().contains(cap)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Open the backend session. Connectionless backends succeed immediately.
    async fn connect(&self) -> OperationResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> OperationResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    // ── Containers (bucket / base path) ────────────────────────────────────

    fn current_container(&self) -> Option<String> {
        None
    }

    /// Switch the active container without re-instantiating the provider
    async fn set_container(&self, _name: &str) -> OperationResult<()> {
        Err(ProviderError::unimplemented("set_container"))
    }

    async fn list_containers(&self) -> OperationResult<Vec<Entry>> {
        Err(ProviderError::unimplemented("list_containers"))
    }

    // ── Mandatory primitives ───────────────────────────────────────────────

    async fn list(&self, path: &str) -> OperationResult<Vec<Entry>>;

    async fn get_metadata(&self, path: &str) -> OperationResult<Entry>;

    async fn read(&self, path: &str) -> OperationResult<Bytes>;

    // ── Optional primitives ────────────────────────────────────────────────

    /// Create or overwrite a file
    async fn write(&self, _path: &str, _data: Bytes) -> OperationResult<()> {
        Err(ProviderError::unimplemented("write"))
    }

    async fn mkdir(&self, _path: &str) -> OperationResult<()> {
        Err(ProviderError::unimplemented("mkdir"))
    }

    /// Delete a file, or a directory (with its contents when `recursive`)
    async fn delete(&self, _path: &str, _recursive: bool) -> OperationResult<()> {
        Err(ProviderError::unimplemented("delete"))
    }

    /// Backend-native move/rename. Only called when `Capability::Move` is set.
    async fn native_move(&self, _src: &str, _dst: &str) -> OperationResult<()> {
        Err(ProviderError::unimplemented("move"))
    }

    /// Backend-native (server-side) copy. Only called when `Capability::Copy`
    /// or `Capability::ServerSideCopy` is set.
    async fn native_copy(&self, _src: &str, _dst: &str) -> OperationResult<()> {
        Err(ProviderError::unimplemented("copy"))
    }

    /// Download a file or directory tree to the local filesystem
    async fn download_to_local(
        &self,
        _remote: &str,
        _local: &Path,
        _options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        Err(ProviderError::unimplemented("download_to_local"))
    }

    /// Upload a local file or directory tree
    async fn upload_from_local(
        &self,
        _local: &Path,
        _remote: &str,
        _options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        Err(ProviderError::unimplemented("upload_from_local"))
    }

    async fn exists(&self, path: &str) -> OperationResult<bool> {
        match self.get_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ── Hooks ──────────────────────────────────────────────────────────────

    /// Backend-specific retry predicate for the resilience wrapper
    fn is_retryable(&self, err: &ProviderError) -> bool {
        err.retryable()
    }

    /// Multipart upload support for the chunked-transfer strategy
    fn multipart(&self) -> Option<&dyn MultipartTarget> {
        None
    }
}

/// Composite operations available on every provider
#[async_trait]
pub trait ProviderExt: StorageProvider {
    /// Move `src` to `dst` using the best strategy the capability set allows
    async fn move_path(&self, src: &str, dst: &str) -> OperationResult<()> {
        dispatch::move_path(self.as_dyn(), src, dst).await
    }

    /// Copy `src` to `dst` using the best strategy the capability set allows
    async fn copy_path(&self, src: &str, dst: &str) -> OperationResult<()> {
        dispatch::copy_path(self.as_dyn(), src, dst).await
    }

    /// Rename in place: `docs/a.txt` + `b.txt` → `docs/b.txt`
    async fn rename(&self, path: &str, new_name: &str) -> OperationResult<String> {
        let dst = crate::path_utils::with_file_name(path, new_name);
        dispatch::move_path(self.as_dyn(), path, &dst).await?;
        Ok(dst)
    }

    /// Move an entry; directories without native move go through a
    /// recursive copy + delete
    async fn move_entry(&self, entry: &Entry, dst: &str, options: &BatchOptions) -> OperationResult<()> {
        dispatch::move_entry(self.as_dyn(), entry, dst, options).await
    }

    async fn copy_entry(&self, entry: &Entry, dst: &str, options: &BatchOptions) -> OperationResult<()> {
        dispatch::copy_entry(self.as_dyn(), entry, dst, options).await
    }

    #[doc(hidden)]
    fn as_dyn(&self) -> &dyn StorageProvider;
}

impl<P: StorageProvider + Sized> ProviderExt for P {
    fn as_dyn(&self) -> &dyn StorageProvider {
        self
    }
}

impl<'a> ProviderExt for dyn StorageProvider + 'a {
    fn as_dyn(&self) -> &dyn StorageProvider {
        self
    }
}
