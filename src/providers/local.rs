//! Local filesystem provider
//!
//! Provider paths are slash-delimited and relative to a root directory (the
//! provider's container). Paths escaping the root are rejected.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::path_utils::{join_local_path, join_path, path_key};
use crate::provider::{
    map_io_error, Capability, CapabilitySet, Entry, EntryMetadata, EntryType, OperationResult,
    ProviderCapabilities, ProviderError, ProviderType, StorageProvider,
};
use crate::transfer::{batch, BatchOptions, BatchSummary, MultipartTarget, UploadPart};

/// Suffix of in-progress multipart uploads
pub const PART_SUFFIX: &str = ".oxide-part";

fn local_capabilities() -> CapabilitySet {
    CapabilitySet::from([
        Capability::List,
        Capability::Read,
        Capability::Write,
        Capability::Delete,
        Capability::Mkdir,
        Capability::Rmdir,
        Capability::Move,
        Capability::Copy,
        Capability::Download,
        Capability::Upload,
        Capability::Permissions,
        Capability::Symlinks,
        Capability::Metadata,
    ])
}

fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

/// Provider over a local directory tree
pub struct LocalProvider {
    root: RwLock<PathBuf>,
    capabilities: ProviderCapabilities,
    /// upload id → temp file
    uploads: Mutex<HashMap<String, PathBuf>>,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
            capabilities: ProviderCapabilities::new(local_capabilities()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// Resolve a provider path to a local path under the root
    fn resolve(&self, path: &str) -> OperationResult<PathBuf> {
        let key = path_key(path).trim_start_matches('/');
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ProviderError::permission_denied(format!(
                "{} escapes the provider root",
                path
            )));
        }
        Ok(join_local_path(&self.root(), key))
    }

    async fn entry_for(&self, key: &str, local: &Path) -> OperationResult<Entry> {
        let meta = tokio::fs::symlink_metadata(local)
            .await
            .map_err(|e| map_io_error(e, key))?;

        let mut metadata = EntryMetadata::default();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions = Some(format!("{:o}", meta.permissions().mode() & 0o777));
        }

        let entry_type = if meta.file_type().is_symlink() {
            metadata.symlink_target = tokio::fs::read_link(local)
                .await
                .ok()
                .map(|t| t.to_string_lossy().to_string());
            EntryType::Symlink
        } else if meta.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };

        let mut entry = Entry::new(entry_type, key).with_metadata(metadata);
        if !meta.is_dir() {
            entry.size = Some(meta.len());
        }
        entry.modified = to_utc(meta.modified());
        Ok(entry)
    }

    async fn copy_dir(&self, src: &Path, dst: &Path, context: &str) -> OperationResult<()> {
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| map_io_error(e, context))?;
        for item in batch::plan_local(src).await? {
            let target = join_local_path(dst, &item.relative);
            if item.is_dir {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| map_io_error(e, &item.relative))?;
            } else {
                tokio::fs::copy(&item.path, &target)
                    .await
                    .map_err(|e| map_io_error(e, &item.relative))?;
            }
        }
        Ok(())
    }

    async fn ensure_parent(local: &Path, context: &str) -> OperationResult<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(e, context))?;
        }
        Ok(())
    }

    fn part_path(local: &Path) -> PathBuf {
        let mut name = local.as_os_str().to_os_string();
        name.push(PART_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    fn display_name(&self) -> String {
        format!("local:{}", self.root().display())
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.snapshot()
    }

    fn current_container(&self) -> Option<String> {
        Some(self.root().display().to_string())
    }

    /// Switch the base directory
    async fn set_container(&self, name: &str) -> OperationResult<()> {
        let meta = tokio::fs::metadata(name)
            .await
            .map_err(|e| map_io_error(e, name))?;
        if !meta.is_dir() {
            return Err(ProviderError::generic(
                "NotADirectory",
                format!("{} is not a directory", name),
            ));
        }
        info!("Local provider root switched to {}", name);
        *self.root.write() = PathBuf::from(name);
        Ok(())
    }

    async fn list(&self, path: &str) -> OperationResult<Vec<Entry>> {
        let dir = self.resolve(path)?;
        let key = path_key(path).trim_start_matches('/').to_string();

        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io_error(e, path))?;
        let mut entries = Vec::new();
        while let Some(child) = read_dir
            .next_entry()
            .await
            .map_err(|e| map_io_error(e, path))?
        {
            let name = child.file_name().to_string_lossy().to_string();
            if name.ends_with(PART_SUFFIX) {
                continue;
            }
            let child_key = join_path(&key, &name);
            entries.push(self.entry_for(&child_key, &child.path()).await?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} entries in {}", entries.len(), dir.display());
        Ok(entries)
    }

    async fn get_metadata(&self, path: &str) -> OperationResult<Entry> {
        let local = self.resolve(path)?;
        let key = path_key(path).trim_start_matches('/').to_string();
        self.entry_for(&key, &local).await
    }

    async fn read(&self, path: &str) -> OperationResult<Bytes> {
        let local = self.resolve(path)?;
        tokio::fs::read(&local)
            .await
            .map(Bytes::from)
            .map_err(|e| map_io_error(e, path))
    }

    async fn write(&self, path: &str, data: Bytes) -> OperationResult<()> {
        let local = self.resolve(path)?;
        Self::ensure_parent(&local, path).await?;
        tokio::fs::write(&local, &data)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn mkdir(&self, path: &str) -> OperationResult<()> {
        let local = self.resolve(path)?;
        if tokio::fs::symlink_metadata(&local).await.is_ok() {
            return Err(ProviderError::already_exists(path));
        }
        tokio::fs::create_dir_all(&local)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn delete(&self, path: &str, recursive: bool) -> OperationResult<()> {
        let local = self.resolve(path)?;
        if path_key(path).trim_start_matches('/').is_empty() {
            return Err(ProviderError::permission_denied("refusing to delete the provider root"));
        }
        let meta = tokio::fs::symlink_metadata(&local)
            .await
            .map_err(|e| map_io_error(e, path))?;

        let result = if meta.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&local).await
            } else {
                tokio::fs::remove_dir(&local).await
            }
        } else {
            tokio::fs::remove_file(&local).await
        };
        result.map_err(|e| map_io_error(e, path))
    }

    async fn native_move(&self, src: &str, dst: &str) -> OperationResult<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Ok(meta) = tokio::fs::metadata(&to).await {
            if meta.is_dir() {
                return Err(ProviderError::already_exists(dst));
            }
        }
        Self::ensure_parent(&to, dst).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| map_io_error(e, src))
    }

    async fn native_copy(&self, src: &str, dst: &str) -> OperationResult<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        let meta = tokio::fs::metadata(&from)
            .await
            .map_err(|e| map_io_error(e, src))?;

        if meta.is_dir() {
            if to.starts_with(&from) {
                return Err(ProviderError::generic(
                    "InvalidDestination",
                    format!("cannot copy {} into itself", src),
                ));
            }
            return self.copy_dir(&from, &to, dst).await;
        }
        Self::ensure_parent(&to, dst).await?;
        tokio::fs::copy(&from, &to)
            .await
            .map(|_| ())
            .map_err(|e| map_io_error(e, src))
    }

    async fn download_to_local(
        &self,
        remote: &str,
        local: &Path,
        options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        batch::download_tree(self, remote, local, options).await
    }

    async fn upload_from_local(
        &self,
        local: &Path,
        remote: &str,
        options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        batch::upload_tree(self, local, remote, options).await
    }

    fn multipart(&self) -> Option<&dyn MultipartTarget> {
        Some(self)
    }
}

#[async_trait]
impl MultipartTarget for LocalProvider {
    async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()> {
        self.write(path, data).await
    }

    async fn begin_multipart(&self, path: &str, total_size: u64) -> OperationResult<String> {
        let local = self.resolve(path)?;
        Self::ensure_parent(&local, path).await?;
        let part_path = Self::part_path(&local);

        let file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| map_io_error(e, path))?;
        file.set_len(total_size)
            .await
            .map_err(|e| map_io_error(e, path))?;

        let upload_id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().insert(upload_id.clone(), part_path);
        Ok(upload_id)
    }

    async fn upload_part(&self, path: &str, upload_id: &str, part: UploadPart) -> OperationResult<()> {
        let part_path = self
            .uploads
            .lock()
            .get(upload_id)
            .cloned()
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&part_path)
            .await
            .map_err(|e| map_io_error(e, path))?;
        file.seek(SeekFrom::Start(part.offset))
            .await
            .map_err(|e| map_io_error(e, path))?;
        file.write_all(&part.data)
            .await
            .map_err(|e| map_io_error(e, path))?;
        file.flush().await.map_err(|e| map_io_error(e, path))
    }

    async fn complete_multipart(&self, path: &str, upload_id: &str, _parts: u32) -> OperationResult<()> {
        let part_path = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;
        let local = self.resolve(path)?;
        tokio::fs::rename(&part_path, &local)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn abort_multipart(&self, path: &str, upload_id: &str) -> OperationResult<()> {
        let part_path = self.uploads.lock().remove(upload_id);
        match part_path {
            Some(part_path) => tokio::fs::remove_file(&part_path)
                .await
                .map_err(|e| map_io_error(e, path)),
            None => Err(ProviderError::generic("NoSuchUpload", upload_id.to_string())),
        }
    }
}
