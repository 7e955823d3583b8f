//! SFTP provider over russh / russh-sftp
//!
//! Provider paths are relative to a base directory (the container); an empty
//! base resolves against the login directory. The session is opened lazily
//! on first use and shared by all calls; concurrent `connect()` callers join
//! the same attempt.

pub mod client;

use std::collections::HashMap;
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::fs::Metadata;
use russh_sftp::protocol::OpenFlags;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use self::client::SftpConnection;
use crate::path_utils::{join_path, path_key};
use crate::provider::{
    Capability, CapabilitySet, ConnectionGate, ConnectionState, Entry, EntryMetadata, EntryType,
    ErrorKind, ErrorMappingTable, ErrorRule, OperationResult, ProviderCapabilities,
    ProviderError, ProviderType, SessionSlot, StorageProvider,
};
use crate::transfer::{batch, BatchOptions, BatchSummary, MultipartTarget, UploadPart};

/// Suffix of in-progress multipart uploads
pub const PART_SUFFIX: &str = ".oxide-part";

/// SFTP status codes and russh-sftp client errors
pub static SFTP_ERROR_TABLE: ErrorMappingTable = ErrorMappingTable::new(
    "sftp",
    &[
        ErrorRule::new("NoSuchFile", ErrorKind::NotFound, false),
        ErrorRule::new("PermissionDenied", ErrorKind::PermissionDenied, false),
        ErrorRule::new("NoConnection", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("ConnectionLost", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("OpUnsupported", ErrorKind::Unimplemented, false),
        ErrorRule::new("Failure", ErrorKind::Generic, false),
        ErrorRule::new("BadMessage", ErrorKind::Generic, false),
        ErrorRule::new("Eof", ErrorKind::Generic, false),
        ErrorRule::new("Timeout", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("IO", ErrorKind::ConnectionFailed, true),
    ],
);

/// Map a russh-sftp error through [`SFTP_ERROR_TABLE`]
pub fn map_sftp_error(err: SftpErrorInner, path: &str) -> ProviderError {
    let code = match &err {
        SftpErrorInner::Status(status) => format!("{:?}", status.status_code),
        SftpErrorInner::Timeout => "Timeout".to_string(),
        SftpErrorInner::IO(_) => "IO".to_string(),
        _ => "ProtocolError".to_string(),
    };
    let message = format!("{}: {}", path, err);
    SFTP_ERROR_TABLE.map_error(&code, message, err)
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    15
}

/// Authentication method
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SftpAuth {
    Password {
        password: String,
    },
    Key {
        key_path: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SftpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpAuth::Password { .. } => f.write_str("Password(***)"),
            SftpAuth::Key { key_path, .. } => write!(f, "Key({})", key_path),
        }
    }
}

/// Provider settings, read from the profile's `settings` object
#[derive(Debug, Clone, Deserialize)]
pub struct SftpSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    /// Base directory; empty means the login directory
    #[serde(default)]
    pub root: String,
    /// Expected `SHA256:...` host key fingerprint
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn sftp_capabilities() -> CapabilitySet {
    CapabilitySet::from([
        Capability::List,
        Capability::Read,
        Capability::Write,
        Capability::Delete,
        Capability::Mkdir,
        Capability::Rmdir,
        Capability::Move,
        Capability::Download,
        Capability::Upload,
        Capability::Permissions,
        Capability::Symlinks,
        Capability::Connection,
        Capability::Metadata,
    ])
}

fn metadata_entry(key: &str, metadata: &Metadata, symlink_target: Option<String>) -> Entry {
    let entry_type = if metadata.is_dir() {
        EntryType::Directory
    } else if metadata.is_symlink() {
        EntryType::Symlink
    } else {
        EntryType::File
    };

    let mut entry = Entry::new(entry_type, key).with_metadata(EntryMetadata {
        permissions: metadata.permissions.map(|p| format!("{:o}", p & 0o777)),
        owner: metadata.uid.map(|u: u32| u.to_string()),
        group: metadata.gid.map(|g: u32| g.to_string()),
        symlink_target,
        ..Default::default()
    });
    if entry_type != EntryType::Directory {
        entry.size = metadata.size;
    }
    entry.modified = metadata
        .mtime
        .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0));
    entry
}

type ConnectionSlot = Arc<SessionSlot<Arc<SftpConnection>>>;

/// SFTP storage backend
pub struct SftpProvider {
    settings: SftpSettings,
    root: RwLock<String>,
    capabilities: ProviderCapabilities,
    gate: ConnectionGate,
    connection: ConnectionSlot,
    /// upload id → remote temp path
    uploads: Mutex<HashMap<String, String>>,
}

impl SftpProvider {
    pub fn new(settings: SftpSettings) -> Self {
        let root = settings.root.clone();
        Self {
            settings,
            root: RwLock::new(root),
            capabilities: ProviderCapabilities::new(sftp_capabilities()),
            gate: ConnectionGate::new(),
            connection: Arc::new(SessionSlot::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SftpSettings {
        &self.settings
    }

    /// Remote path for a provider path
    fn remote_path(&self, path: &str) -> String {
        let key = path_key(path).trim_start_matches('/');
        let root = self.root.read();
        if root.is_empty() {
            if key.is_empty() {
                ".".to_string()
            } else {
                key.to_string()
            }
        } else {
            join_path(&root, key)
        }
    }

    async fn session(&self) -> OperationResult<Arc<SftpConnection>> {
        if let Some(conn) = self.connection.get() {
            return Ok(conn);
        }
        self.connect().await?;
        self.connection
            .get()
            .ok_or_else(|| ProviderError::connection_failed("SFTP session not available"))
    }

    /// Map an error, dropping the session when the link is gone
    fn fail(&self, err: SftpErrorInner, path: &str) -> ProviderError {
        let mapped = map_sftp_error(err, path);
        if mapped.kind() == ErrorKind::ConnectionFailed {
            warn!("SFTP connection lost while accessing {}", path);
            self.connection.clear();
            self.gate.mark_disconnected();
        }
        mapped
    }

    async fn stat_remote(&self, conn: &SftpConnection, remote: &str) -> OperationResult<Metadata> {
        conn.sftp
            .metadata(remote)
            .await
            .map_err(|e| self.fail(e, remote))
    }

    async fn write_remote(&self, remote: &str, data: &[u8]) -> OperationResult<()> {
        let conn = self.session().await?;
        let mut file = conn
            .sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| self.fail(e, remote))?;
        file.write_all(data)
            .await
            .map_err(|e| io_failure(e, remote))?;
        file.flush().await.map_err(|e| io_failure(e, remote))?;
        debug!("Wrote {} bytes to {}", data.len(), remote);
        Ok(())
    }
}

fn io_failure(err: std::io::Error, remote: &str) -> ProviderError {
    crate::provider::map_io_error(err, remote)
}

#[async_trait]
impl StorageProvider for SftpProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Sftp
    }

    fn display_name(&self) -> String {
        format!(
            "{}@{}:{}",
            self.settings.username, self.settings.host, self.settings.port
        )
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.snapshot()
    }

    async fn connect(&self) -> OperationResult<()> {
        let settings = self.settings.clone();
        let slot = self.connection.clone();
        let started = slot.epoch();
        self.gate
            .connect_with(move || async move {
                let conn = Arc::new(client::open(settings).await?);
                if let Err(stale) = slot.install(started, conn) {
                    stale.close().await;
                    return Err(ProviderError::cancelled(
                        "SFTP provider was disconnected while connecting",
                    ));
                }
                Ok(())
            })
            .await
    }

    async fn disconnect(&self) -> OperationResult<()> {
        let conn = self.connection.clear();
        self.gate.mark_disconnected();
        if let Some(conn) = conn {
            conn.close().await;
            info!("SFTP session to {} closed", self.display_name());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.gate.is_connected()
    }

    fn connection_state(&self) -> ConnectionState {
        self.gate.state()
    }

    fn current_container(&self) -> Option<String> {
        Some(self.root.read().clone())
    }

    /// Switch the base directory
    async fn set_container(&self, name: &str) -> OperationResult<()> {
        let conn = self.session().await?;
        let meta = self.stat_remote(&conn, name).await?;
        if !meta.is_dir() {
            return Err(ProviderError::generic(
                "NotADirectory",
                format!("{} is not a directory", name),
            ));
        }
        *self.root.write() = name.to_string();
        Ok(())
    }

    async fn list(&self, path: &str) -> OperationResult<Vec<Entry>> {
        let conn = self.session().await?;
        let remote = self.remote_path(path);
        let key = path_key(path).trim_start_matches('/').to_string();
        debug!("Listing directory: {}", remote);

        let read_dir = conn
            .sftp
            .read_dir(&remote)
            .await
            .map_err(|e| self.fail(e, &remote))?;

        let mut entries = Vec::new();
        for item in read_dir {
            let name = item.file_name();
            if name == "." || name == ".." || name.ends_with(PART_SUFFIX) {
                continue;
            }
            let metadata = item.metadata();
            let child_key = join_path(&key, &name);
            let symlink_target = if metadata.is_symlink() {
                conn.sftp
                    .read_link(&join_path(&remote, &name))
                    .await
                    .ok()
            } else {
                None
            };
            entries.push(metadata_entry(&child_key, &metadata, symlink_target));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Listed {} entries in {}", entries.len(), remote);
        Ok(entries)
    }

    async fn get_metadata(&self, path: &str) -> OperationResult<Entry> {
        let conn = self.session().await?;
        let remote = self.remote_path(path);
        let key = path_key(path).trim_start_matches('/').to_string();
        let metadata = self.stat_remote(&conn, &remote).await?;
        let symlink_target = if metadata.is_symlink() {
            conn.sftp.read_link(&remote).await.ok()
        } else {
            None
        };
        Ok(metadata_entry(&key, &metadata, symlink_target))
    }

    async fn read(&self, path: &str) -> OperationResult<Bytes> {
        let conn = self.session().await?;
        let remote = self.remote_path(path);
        let mut file = conn
            .sftp
            .open(&remote)
            .await
            .map_err(|e| self.fail(e, &remote))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| io_failure(e, &remote))?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, path: &str, data: Bytes) -> OperationResult<()> {
        let remote = self.remote_path(path);
        self.write_remote(&remote, &data).await
    }

    async fn mkdir(&self, path: &str) -> OperationResult<()> {
        let conn = self.session().await?;
        let remote = self.remote_path(path);
        if conn.sftp.metadata(&remote).await.is_ok() {
            return Err(ProviderError::already_exists(path));
        }
        info!("Creating directory: {}", remote);
        conn.sftp
            .create_dir(&remote)
            .await
            .map_err(|e| self.fail(e, &remote))
    }

    async fn delete(&self, path: &str, recursive: bool) -> OperationResult<()> {
        let conn = self.session().await?;
        let remote = self.remote_path(path);
        let metadata = self.stat_remote(&conn, &remote).await?;
        info!("Deleting: {} (recursive: {})", remote, recursive);

        if !metadata.is_dir() {
            return conn
                .sftp
                .remove_file(&remote)
                .await
                .map_err(|e| self.fail(e, &remote));
        }

        if recursive {
            // Breadth-first plan reversed: children always go before parents
            let plan = batch::plan_remote(self, path).await?;
            for entry in plan.iter().rev() {
                let target = self.remote_path(&entry.path);
                let result = if entry.is_directory() {
                    conn.sftp.remove_dir(&target).await
                } else {
                    conn.sftp.remove_file(&target).await
                };
                result.map_err(|e| self.fail(e, &target))?;
            }
        }
        conn.sftp
            .remove_dir(&remote)
            .await
            .map_err(|e| self.fail(e, &remote))
    }

    async fn native_move(&self, src: &str, dst: &str) -> OperationResult<()> {
        let conn = self.session().await?;
        let from = self.remote_path(src);
        let to = self.remote_path(dst);
        if let Ok(meta) = conn.sftp.metadata(&to).await {
            if meta.is_dir() {
                return Err(ProviderError::already_exists(dst));
            }
        }
        info!("Renaming {} to {}", from, to);
        conn.sftp
            .rename(&from, &to)
            .await
            .map_err(|e| self.fail(e, &from))
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
impl MultipartTarget for SftpProvider {
    async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()> {
        self.write(path, data).await
    }

    async fn begin_multipart(&self, path: &str, _total_size: u64) -> OperationResult<String> {
        let part_path = format!("{}{}", self.remote_path(path), PART_SUFFIX);
        self.write_remote(&part_path, &[]).await?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().insert(upload_id.clone(), part_path);
        Ok(upload_id)
    }

    async fn upload_part(&self, _path: &str, upload_id: &str, part: UploadPart) -> OperationResult<()> {
        let part_path = self
            .uploads
            .lock()
            .get(upload_id)
            .cloned()
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;

        let conn = self.session().await?;
        let mut file = conn
            .sftp
            .open_with_flags(&part_path, OpenFlags::WRITE)
            .await
            .map_err(|e| self.fail(e, &part_path))?;
        file.seek(SeekFrom::Start(part.offset))
            .await
            .map_err(|e| io_failure(e, &part_path))?;
        file.write_all(&part.data)
            .await
            .map_err(|e| io_failure(e, &part_path))?;
        file.flush().await.map_err(|e| io_failure(e, &part_path))
    }

    async fn complete_multipart(&self, path: &str, upload_id: &str, _parts: u32) -> OperationResult<()> {
        let part_path = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;
        let conn = self.session().await?;
        let remote = self.remote_path(path);

        // SFTP v3 rename refuses to overwrite
        if conn.sftp.metadata(&remote).await.is_ok() {
            conn.sftp
                .remove_file(&remote)
                .await
                .map_err(|e| self.fail(e, &remote))?;
        }
        conn.sftp
            .rename(&part_path, &remote)
            .await
            .map_err(|e| self.fail(e, &part_path))
    }

    async fn abort_multipart(&self, _path: &str, upload_id: &str) -> OperationResult<()> {
        let part_path = self.uploads.lock().remove(upload_id);
        let Some(part_path) = part_path else {
            return Err(ProviderError::generic("NoSuchUpload", upload_id.to_string()));
        };
        let conn = self.session().await?;
        conn.sftp
            .remove_file(&part_path)
            .await
            .map_err(|e| self.fail(e, &part_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &str) -> SftpSettings {
        serde_json::from_value(serde_json::json!({
            "host": "127.0.0.1",
            "port": 1,
            "username": "tester",
            "auth": { "type": "password", "password": "hunter2" },
            "root": root,
            "timeout_secs": 2
        }))
        .unwrap()
    }

    #[test]
    fn test_settings_defaults() {
        let parsed: SftpSettings = serde_json::from_value(serde_json::json!({
            "host": "example.com",
            "username": "me",
            "auth": { "type": "key", "key_path": "~/.ssh/id_ed25519" }
        }))
        .unwrap();
        assert_eq!(parsed.port, 22);
        assert_eq!(parsed.timeout_secs, 15);
        assert!(parsed.root.is_empty());
        assert!(matches!(parsed.auth, SftpAuth::Key { passphrase: None, .. }));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", settings(""));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_remote_path_resolution() {
        let home = SftpProvider::new(settings(""));
        assert_eq!(home.remote_path(""), ".");
        assert_eq!(home.remote_path("docs/a.txt"), "docs/a.txt");
        assert_eq!(home.remote_path("docs/"), "docs");

        let rooted = SftpProvider::new(settings("/srv/data"));
        assert_eq!(rooted.remote_path("/"), "/srv/data");
        assert_eq!(rooted.remote_path("docs/a.txt"), "/srv/data/docs/a.txt");
    }

    #[test]
    fn test_status_codes_map_to_taxonomy() {
        let err = SFTP_ERROR_TABLE.map("NoSuchFile", "gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = SFTP_ERROR_TABLE.map("ConnectionLost", "dropped");
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.retryable());
        let err = SFTP_ERROR_TABLE.map("OpUnsupported", "no");
        assert_eq!(err.kind(), ErrorKind::Unimplemented);
        let err = SFTP_ERROR_TABLE.map("Failure", "generic");
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(!err.retryable());
    }

    #[test]
    fn test_capabilities_exclude_copy() {
        let provider = SftpProvider::new(settings(""));
        assert!(provider.has_capability(Capability::Move));
        assert!(!provider.has_capability(Capability::Copy));
        assert_eq!(provider.display_name(), "tester@127.0.0.1:1");
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failed() {
        let provider = SftpProvider::new(settings(""));
        let err = provider.list("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(!provider.is_connected());
        assert_eq!(provider.gate.connect_attempts(), 1);
    }
}
