//! Capability-driven fallback dispatcher for composite operations
//!
//! `move` and `copy` are composed from primitives using a fixed priority
//! chain. Native/server-side strategies always win over composed ones since
//! they avoid pulling object bodies through the client.
//!
//! Composed strategies are NOT atomic: a failed delete after a successful
//! copy leaves both copies in place, and nothing is rolled back. The first
//! failing step's error is returned untouched.

use bytes::Bytes;
use tracing::debug;

use super::capability::{Capability, CapabilitySet};
use super::result::{OperationResult, ProviderError};
use super::types::Entry;
use super::StorageProvider;
use crate::transfer::{batch, BatchOptions, ChunkedUploader, ChunkingConfig, UploadMode};

/// Strategy selected for a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStrategy {
    Native,
    CopyThenDelete,
    ReadWriteDelete,
}

/// Strategy selected for a copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    Native,
    ReadWrite,
}

pub fn select_move_strategy(caps: &CapabilitySet) -> Option<MoveStrategy> {
    if caps.contains(Capability::Move) {
        Some(MoveStrategy::Native)
    } else if caps.contains_any(&[Capability::Copy, Capability::ServerSideCopy])
        && caps.contains(Capability::Delete)
    {
        Some(MoveStrategy::CopyThenDelete)
    } else if caps.contains_all(&[Capability::Read, Capability::Write, Capability::Delete]) {
        Some(MoveStrategy::ReadWriteDelete)
    } else {
        None
    }
}

pub fn select_copy_strategy(caps: &CapabilitySet) -> Option<CopyStrategy> {
    if caps.contains_any(&[Capability::Copy, Capability::ServerSideCopy]) {
        Some(CopyStrategy::Native)
    } else if caps.contains_all(&[Capability::Read, Capability::Write]) {
        Some(CopyStrategy::ReadWrite)
    } else {
        None
    }
}

/// Write a body pulled through the client. Bodies at or above the
/// chunking threshold use the multipart hook when the provider has one.
async fn write_body(
    provider: &dyn StorageProvider,
    dst: &str,
    data: Bytes,
    chunking: &ChunkingConfig,
) -> OperationResult<()> {
    let uploader = ChunkedUploader::new(*chunking);
    if provider.multipart().is_some() && uploader.mode_for(data.len() as u64) != UploadMode::SingleShot {
        uploader.upload_to(provider, dst, data, None).await?;
        return Ok(());
    }
    provider.write(dst, data).await
}

/// Move a single object
pub async fn move_path(provider: &dyn StorageProvider, src: &str, dst: &str) -> OperationResult<()> {
    move_path_with(provider, src, dst, &ChunkingConfig::default()).await
}

/// Move a single object using `chunking` for client-side transfers
pub async fn move_path_with(
    provider: &dyn StorageProvider,
    src: &str,
    dst: &str,
    chunking: &ChunkingConfig,
) -> OperationResult<()> {
    let caps = provider.capabilities();
    let Some(strategy) = select_move_strategy(&caps) else {
        debug!("move {} -> {}: no strategy available", src, dst);
        return Err(ProviderError::unimplemented("move"));
    };
    debug!("move {} -> {} via {:?}", src, dst, strategy);

    match strategy {
        MoveStrategy::Native => provider.native_move(src, dst).await,
        MoveStrategy::CopyThenDelete => {
            provider.native_copy(src, dst).await?;
            provider.delete(src, false).await
        }
        MoveStrategy::ReadWriteDelete => {
            let data = provider.read(src).await?;
            write_body(provider, dst, data, chunking).await?;
            provider.delete(src, false).await
        }
    }
}

/// Copy a single object
pub async fn copy_path(provider: &dyn StorageProvider, src: &str, dst: &str) -> OperationResult<()> {
    copy_path_with(provider, src, dst, &ChunkingConfig::default()).await
}

/// Copy a single object using `chunking` for client-side transfers
pub async fn copy_path_with(
    provider: &dyn StorageProvider,
    src: &str,
    dst: &str,
    chunking: &ChunkingConfig,
) -> OperationResult<()> {
    let caps = provider.capabilities();
    let Some(strategy) = select_copy_strategy(&caps) else {
        debug!("copy {} -> {}: no strategy available", src, dst);
        return Err(ProviderError::unimplemented("copy"));
    };
    debug!("copy {} -> {} via {:?}", src, dst, strategy);

    match strategy {
        CopyStrategy::Native => provider.native_copy(src, dst).await,
        CopyStrategy::ReadWrite => {
            let data = provider.read(src).await?;
            write_body(provider, dst, data, chunking).await
        }
    }
}

/// Move an entry. Directories use native move when available, otherwise a
/// recursive copy followed by a recursive delete of the source.
///
/// Without any usable strategy this fails before touching the provider.
pub async fn move_entry(
    provider: &dyn StorageProvider,
    entry: &Entry,
    dst: &str,
    options: &BatchOptions,
) -> OperationResult<()> {
    let caps = provider.capabilities();
    if !entry.is_directory() || caps.contains(Capability::Move) {
        return move_path_with(provider, &entry.path, dst, &options.chunking).await;
    }
    if select_copy_strategy(&caps).is_none() || !caps.contains(Capability::Delete) {
        debug!("move {} -> {}: no directory strategy available", entry.path, dst);
        return Err(ProviderError::unimplemented("move"));
    }
    batch::move_tree(provider, &entry.path, dst, options).await.map(|_| ())
}

/// Copy an entry; directories are copied recursively
pub async fn copy_entry(
    provider: &dyn StorageProvider,
    entry: &Entry,
    dst: &str,
    options: &BatchOptions,
) -> OperationResult<()> {
    if !entry.is_directory() {
        return copy_path_with(provider, &entry.path, dst, &options.chunking).await;
    }
    if select_copy_strategy(&provider.capabilities()).is_none() {
        debug!("copy {} -> {}: no directory strategy available", entry.path, dst);
        return Err(ProviderError::unimplemented("copy"));
    }
    batch::copy_tree(provider, &entry.path, dst, options).await.map(|_| ())
}
