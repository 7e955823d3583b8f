//! Recursive directory transfers
//!
//! Every operation plans the full entry list first, then processes it in
//! listing order. Progress callbacks fire once per processed entry with a
//! strictly increasing `current`. Cancellation is checked between entries:
//! an entry already dispatched finishes, the next one is never started.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use super::chunked::{ChunkedUploader, ChunkingConfig};
use super::control::{check_cancelled, TransferControl};
use super::progress::{BatchProgress, BatchProgressCallback};
use crate::path_utils::{as_directory_path, join_local_path, rebase_path};
use crate::provider::{
    dispatch, map_io_error, Capability, Entry, ErrorKind, OperationResult, StorageProvider,
};

/// Options shared by the recursive transfer operations
#[derive(Clone, Default)]
pub struct BatchOptions {
    pub control: Option<Arc<TransferControl>>,
    pub progress: Option<BatchProgressCallback>,
    pub chunking: ChunkingConfig,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control(mut self, control: Arc<TransferControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_progress(mut self, progress: BatchProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    fn check_cancelled(&self) -> OperationResult<()> {
        check_cancelled(self.control.as_deref())
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("cancellable", &self.control.is_some())
            .field("progress", &self.progress.is_some())
            .field("chunking", &self.chunking)
            .finish()
    }
}

/// Totals of a completed batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Emits monotonically increasing batch progress
struct ProgressTracker<'a> {
    callback: Option<&'a BatchProgressCallback>,
    current: usize,
    total: usize,
    bytes: u64,
}

impl<'a> ProgressTracker<'a> {
    fn new(options: &'a BatchOptions, total: usize) -> Self {
        Self {
            callback: options.progress.as_ref(),
            current: 0,
            total,
            bytes: 0,
        }
    }

    fn advance(&mut self, current_file: &str, bytes: u64) {
        self.current = (self.current + 1).min(self.total);
        self.bytes += bytes;
        if let Some(cb) = self.callback {
            cb(&BatchProgress {
                current: self.current,
                total: self.total,
                current_file: current_file.to_string(),
                bytes_transferred: self.bytes,
            });
        }
    }
}

/// Breadth-first walk of a remote tree, each directory in listing order.
/// The root itself is not included.
pub async fn plan_remote(provider: &dyn StorageProvider, root: &str) -> OperationResult<Vec<Entry>> {
    let mut planned = Vec::new();
    let mut pending = VecDeque::from([as_directory_path(root)]);

    while let Some(dir) = pending.pop_front() {
        for entry in provider.list(&dir).await? {
            if entry.is_directory() {
                pending.push_back(entry.path.clone());
            }
            planned.push(entry);
        }
    }
    Ok(planned)
}

/// A local file or directory, relative to the walk root
#[derive(Debug, Clone)]
pub struct LocalItem {
    pub relative: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Breadth-first walk of a local tree, each directory sorted by name
pub async fn plan_local(root: &Path) -> OperationResult<Vec<LocalItem>> {
    let mut planned = Vec::new();
    let mut pending = VecDeque::from([(root.to_path_buf(), String::new())]);

    while let Some((dir, relative)) = pending.pop_front() {
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io_error(e, &dir.display().to_string()))?;

        let mut children = Vec::new();
        while let Some(child) = read_dir
            .next_entry()
            .await
            .map_err(|e| map_io_error(e, &dir.display().to_string()))?
        {
            let file_type = child
                .file_type()
                .await
                .map_err(|e| map_io_error(e, &child.path().display().to_string()))?;
            let size = if file_type.is_file() {
                child.metadata().await.map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };
            let name = child.file_name().to_string_lossy().to_string();
            children.push(LocalItem {
                relative: if relative.is_empty() {
                    name
                } else {
                    format!("{}/{}", relative, name)
                },
                path: child.path(),
                is_dir: file_type.is_dir(),
                size,
            });
        }
        children.sort_by(|a, b| a.relative.cmp(&b.relative));

        for child in children {
            if child.is_dir {
                pending.push_back((child.path.clone(), child.relative.clone()));
            }
            planned.push(child);
        }
    }
    Ok(planned)
}

async fn write_local(local: &Path, data: &Bytes) -> OperationResult<()> {
    if let Some(parent) = local.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io_error(e, &parent.display().to_string()))?;
    }
    tokio::fs::write(local, data)
        .await
        .map_err(|e| map_io_error(e, &local.display().to_string()))
}

async fn ensure_remote_dir(provider: &dyn StorageProvider, path: &str) -> OperationResult<()> {
    if !provider.has_capability(Capability::Mkdir) {
        // Object stores have implicit directories
        return Ok(());
    }
    match provider.mkdir(path).await {
        Err(e) if e.kind() != ErrorKind::AlreadyExists => Err(e),
        _ => Ok(()),
    }
}

/// Download a remote file or directory tree into `local`
pub async fn download_tree(
    provider: &dyn StorageProvider,
    remote: &str,
    local: &Path,
    options: &BatchOptions,
) -> OperationResult<BatchSummary> {
    let root = provider.get_metadata(remote).await?;
    let mut summary = BatchSummary::default();

    if !root.is_directory() {
        options.check_cancelled()?;
        let mut progress = ProgressTracker::new(options, 1);
        let data = provider.read(&root.path).await?;
        write_local(local, &data).await?;
        summary.files = 1;
        summary.bytes = data.len() as u64;
        progress.advance(&root.path, summary.bytes);
        return Ok(summary);
    }

    tokio::fs::create_dir_all(local)
        .await
        .map_err(|e| map_io_error(e, &local.display().to_string()))?;

    let plan = plan_remote(provider, &root.path).await?;
    info!("Downloading {} ({} entries) to {}", remote, plan.len(), local.display());
    let mut progress = ProgressTracker::new(options, plan.len());

    for entry in &plan {
        options.check_cancelled()?;
        let relative = rebase_path(&entry.path, &root.path, "");
        let target = join_local_path(local, &relative);

        if entry.is_directory() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| map_io_error(e, &target.display().to_string()))?;
            summary.directories += 1;
            progress.advance(&entry.path, 0);
        } else {
            let data = provider.read(&entry.path).await?;
            write_local(&target, &data).await?;
            summary.files += 1;
            summary.bytes += data.len() as u64;
            progress.advance(&entry.path, data.len() as u64);
        }
    }

    debug!("Download of {} finished: {:?}", remote, summary);
    Ok(summary)
}

/// Upload a local file or directory tree to `remote`
pub async fn upload_tree(
    provider: &dyn StorageProvider,
    local: &Path,
    remote: &str,
    options: &BatchOptions,
) -> OperationResult<BatchSummary> {
    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| map_io_error(e, &local.display().to_string()))?;
    let uploader = ChunkedUploader::new(options.chunking);
    let mut summary = BatchSummary::default();

    if !meta.is_dir() {
        options.check_cancelled()?;
        let mut progress = ProgressTracker::new(options, 1);
        let data = read_local(local).await?;
        let len = data.len() as u64;
        uploader.upload_to(provider, remote, data, None).await?;
        summary.files = 1;
        summary.bytes = len;
        progress.advance(remote, len);
        return Ok(summary);
    }

    let remote_root = as_directory_path(remote);
    ensure_remote_dir(provider, &remote_root).await?;

    let plan = plan_local(local).await?;
    info!("Uploading {} ({} entries) to {}", local.display(), plan.len(), remote);
    let mut progress = ProgressTracker::new(options, plan.len());

    for item in &plan {
        options.check_cancelled()?;
        let target = format!("{}{}", remote_root, item.relative);

        if item.is_dir {
            let target = as_directory_path(&target);
            ensure_remote_dir(provider, &target).await?;
            summary.directories += 1;
            progress.advance(&target, 0);
        } else {
            let data = read_local(&item.path).await?;
            let len = data.len() as u64;
            uploader.upload_to(provider, &target, data, None).await?;
            summary.files += 1;
            summary.bytes += len;
            progress.advance(&target, len);
        }
    }

    debug!("Upload of {} finished: {:?}", local.display(), summary);
    Ok(summary)
}

async fn read_local(path: &Path) -> OperationResult<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| map_io_error(e, &path.display().to_string()))
}

/// Copy a file or directory tree within one provider
pub async fn copy_tree(
    provider: &dyn StorageProvider,
    src: &str,
    dst: &str,
    options: &BatchOptions,
) -> OperationResult<BatchSummary> {
    let root = provider.get_metadata(src).await?;
    let mut summary = BatchSummary::default();

    if !root.is_directory() {
        options.check_cancelled()?;
        let mut progress = ProgressTracker::new(options, 1);
        dispatch::copy_path_with(provider, &root.path, dst, &options.chunking).await?;
        summary.files = 1;
        summary.bytes = root.size.unwrap_or(0);
        progress.advance(&root.path, summary.bytes);
        return Ok(summary);
    }

    let dst_root = as_directory_path(dst);
    ensure_remote_dir(provider, &dst_root).await?;

    let plan = plan_remote(provider, &root.path).await?;
    info!("Copying {} ({} entries) to {}", src, plan.len(), dst_root);
    let mut progress = ProgressTracker::new(options, plan.len());

    for entry in &plan {
        options.check_cancelled()?;
        let target = rebase_path(&entry.path, &root.path, &dst_root);

        if entry.is_directory() {
            ensure_remote_dir(provider, &target).await?;
            summary.directories += 1;
            progress.advance(&entry.path, 0);
        } else {
            dispatch::copy_path_with(provider, &entry.path, &target, &options.chunking).await?;
            let size = entry.size.unwrap_or(0);
            summary.files += 1;
            summary.bytes += size;
            progress.advance(&entry.path, size);
        }
    }
    Ok(summary)
}

/// Move a tree by copying it and then deleting the source recursively.
///
/// Not atomic: if the final delete fails the copy stays in place.
pub async fn move_tree(
    provider: &dyn StorageProvider,
    src: &str,
    dst: &str,
    options: &BatchOptions,
) -> OperationResult<BatchSummary> {
    let summary = copy_tree(provider, src, dst, options).await?;
    options.check_cancelled()?;
    provider.delete(src, true).await?;
    Ok(summary)
}
