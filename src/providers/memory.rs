//! In-memory provider
//!
//! Backs the `mock` provider type. Containers map to independent key spaces,
//! directories are created implicitly by writes (object-store style) and
//! every primitive call is recorded so tests can assert on call order.
//! Failures can be injected per operation and path.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::path_utils::{is_same_or_descendant, parent_path, path_key, rebase_path};
use crate::provider::{
    Capability, CapabilitySet, ConnectionGate, ConnectionState, Entry, OperationResult,
    ProviderCapabilities, ProviderError, ProviderType, StorageProvider,
};
use crate::transfer::{MultipartTarget, UploadPart};

const DEFAULT_CONTAINER: &str = "default";

#[derive(Debug, Clone)]
enum Node {
    File { data: Bytes, modified: DateTime<Utc> },
    Dir { modified: DateTime<Utc> },
}

type Tree = BTreeMap<String, Node>;

struct Store {
    containers: BTreeMap<String, Tree>,
    current: String,
}

impl Store {
    fn tree(&self) -> &Tree {
        static EMPTY: Tree = Tree::new();
        self.containers.get(&self.current).unwrap_or(&EMPTY)
    }

    fn tree_mut(&mut self) -> &mut Tree {
        self.containers.entry(self.current.clone()).or_default()
    }
}

struct InjectedFailure {
    op: String,
    path: String,
    /// `None` fails forever
    remaining: Option<usize>,
    error: ProviderError,
}

struct PendingUpload {
    path: String,
    parts: BTreeMap<u32, Bytes>,
}

/// Key form of a provider path: no leading or trailing slash, root is `""`
fn normalize(path: &str) -> String {
    path_key(path).trim_start_matches('/').to_string()
}

fn ensure_parents(tree: &mut Tree, key: &str) {
    let mut parent = normalize(&parent_path(key));
    while !parent.is_empty() {
        tree.entry(parent.clone()).or_insert(Node::Dir {
            modified: Utc::now(),
        });
        parent = normalize(&parent_path(&parent));
    }
}

fn subtree_keys(tree: &Tree, key: &str) -> Vec<String> {
    tree.keys()
        .filter(|k| is_same_or_descendant(k, key))
        .cloned()
        .collect()
}

fn node_entry(key: &str, node: &Node) -> Entry {
    match node {
        Node::File { data, modified } => {
            Entry::file(key, data.len() as u64).with_modified(*modified)
        }
        Node::Dir { modified } => Entry::directory(key).with_modified(*modified),
    }
}

/// In-memory storage backend with call recording and failure injection
pub struct MemoryProvider {
    capabilities: ProviderCapabilities,
    store: RwLock<Store>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<InjectedFailure>>,
    gate: ConnectionGate,
    connect_delay: Mutex<Duration>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
}

impl MemoryProvider {
    /// Provider with every capability
    pub fn new() -> Self {
        Self::with_capabilities(CapabilitySet::all())
    }

    pub fn with_capabilities(capabilities: CapabilitySet) -> Self {
        let mut containers = BTreeMap::new();
        containers.insert(DEFAULT_CONTAINER.to_string(), Tree::new());
        Self {
            capabilities: ProviderCapabilities::new(capabilities),
            store: RwLock::new(Store {
                containers,
                current: DEFAULT_CONTAINER.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            gate: ConnectionGate::new(),
            connect_delay: Mutex::new(Duration::ZERO),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    // ── Test helpers ───────────────────────────────────────────────────────

    /// Seed a file without recording a call
    pub fn insert_file(&self, path: &str, data: Bytes) {
        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        ensure_parents(tree, &key);
        tree.insert(
            key,
            Node::File {
                data,
                modified: Utc::now(),
            },
        );
    }

    pub fn insert_dir(&self, path: &str) {
        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        ensure_parents(tree, &key);
        tree.entry(key).or_insert(Node::Dir {
            modified: Utc::now(),
        });
    }

    /// Add an empty container (bucket)
    pub fn add_container(&self, name: &str) {
        self.store
            .write()
            .containers
            .entry(name.to_string())
            .or_default();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.store.read().tree().contains_key(&normalize(path))
    }

    pub fn file_contents(&self, path: &str) -> Option<Bytes> {
        match self.store.read().tree().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Recorded provider calls, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Fail the next `op` on `path` with `error`. `"*"` matches any path.
    pub fn fail_next(&self, op: &str, path: &str, error: ProviderError) {
        self.fail_times(op, path, 1, error);
    }

    pub fn fail_times(&self, op: &str, path: &str, times: usize, error: ProviderError) {
        self.push_failure(op, path, Some(times), error);
    }

    pub fn fail_always(&self, op: &str, path: &str, error: ProviderError) {
        self.push_failure(op, path, None, error);
    }

    /// Delay applied inside every connection attempt
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Number of connection attempts actually started
    pub fn connect_attempts(&self) -> u64 {
        self.gate.connect_attempts()
    }

    /// Toggle the mutating capabilities, as when a share turns read-only
    pub fn set_read_only(&self, read_only: bool) {
        const MUTATING: [Capability; 5] = [
            Capability::Write,
            Capability::Delete,
            Capability::Move,
            Capability::Mkdir,
            Capability::Rmdir,
        ];
        if read_only {
            for cap in MUTATING {
                self.capabilities.remove(cap);
            }
        } else {
            self.capabilities.add(&MUTATING);
        }
    }

    fn push_failure(&self, op: &str, path: &str, remaining: Option<usize>, error: ProviderError) {
        let path = if path == "*" {
            path.to_string()
        } else {
            normalize(path)
        };
        self.failures.lock().push(InjectedFailure {
            op: op.to_string(),
            path,
            remaining,
            error,
        });
    }

    fn take_failure(&self, op: &str, path: &str) -> Option<ProviderError> {
        let key = normalize(path);
        let mut failures = self.failures.lock();
        let idx = failures
            .iter()
            .position(|f| f.op == op && (f.path == "*" || f.path == key))?;

        let failure = &mut failures[idx];
        let error = failure.error.clone();
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                failures.remove(idx);
            }
        }
        Some(error)
    }

    fn require(&self, cap: Capability, op: &str) -> OperationResult<()> {
        if self.capabilities.has(cap) {
            Ok(())
        } else {
            Err(ProviderError::unimplemented(op))
        }
    }

    /// Record the call, then apply any injected failure for it
    fn begin(&self, op: &str, path: &str, record: String) -> OperationResult<()> {
        debug!("memory: {}", record);
        self.calls.lock().push(record);
        match self.take_failure(op, path) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn copy_subtree(&self, src: &str, dst: &str, remove_source: bool) -> OperationResult<()> {
        let src_key = normalize(src);
        let dst_key = normalize(dst);

        let mut store = self.store.write();
        let tree = store.tree_mut();

        let src_is_dir = match tree.get(&src_key) {
            None => return Err(ProviderError::not_found(src)),
            Some(node) => matches!(node, Node::Dir { .. }),
        };
        if src_is_dir && is_same_or_descendant(&dst_key, &src_key) {
            return Err(ProviderError::generic(
                "InvalidDestination",
                format!("cannot place {} inside itself", src),
            ));
        }
        if let Some(Node::Dir { .. }) = tree.get(&dst_key) {
            return Err(ProviderError::already_exists(dst));
        }

        let keys = subtree_keys(tree, &src_key);
        let mut moved = Vec::with_capacity(keys.len());
        for key in keys {
            let node = if remove_source {
                tree.remove(&key)
            } else {
                tree.get(&key).cloned()
            };
            if let Some(node) = node {
                moved.push((rebase_path(&key, &src_key, &dst_key), node));
            }
        }

        ensure_parents(tree, &dst_key);
        for (key, node) in moved {
            tree.insert(key, node);
        }
        Ok(())
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Mock
    }

    fn display_name(&self) -> String {
        format!("memory://{}", self.store.read().current)
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.snapshot()
    }

    async fn connect(&self) -> OperationResult<()> {
        self.gate
            .connect_with(|| {
                let delay = *self.connect_delay.lock();
                let failure = self.take_failure("connect", "");
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    match failure {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
            })
            .await
    }

    async fn disconnect(&self) -> OperationResult<()> {
        self.gate.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.gate.is_connected()
    }

    fn connection_state(&self) -> ConnectionState {
        self.gate.state()
    }

    fn current_container(&self) -> Option<String> {
        Some(self.store.read().current.clone())
    }

    async fn set_container(&self, name: &str) -> OperationResult<()> {
        self.require(Capability::Containers, "set_container")?;
        let mut store = self.store.write();
        if !store.containers.contains_key(name) {
            return Err(ProviderError::not_found(name));
        }
        store.current = name.to_string();
        Ok(())
    }

    async fn list_containers(&self) -> OperationResult<Vec<Entry>> {
        self.require(Capability::Containers, "list_containers")?;
        self.begin("list_containers", "", "list_containers".to_string())?;
        Ok(self
            .store
            .read()
            .containers
            .keys()
            .map(Entry::bucket)
            .collect())
    }

    async fn list(&self, path: &str) -> OperationResult<Vec<Entry>> {
        self.require(Capability::List, "list")?;
        self.begin("list", path, format!("list {}", path))?;

        let key = normalize(path);
        let store = self.store.read();
        let tree = store.tree();
        match tree.get(&key) {
            Some(Node::File { .. }) => {
                return Err(ProviderError::generic(
                    "NotADirectory",
                    format!("{} is not a directory", path),
                ))
            }
            None if !key.is_empty() => return Err(ProviderError::not_found(path)),
            _ => {}
        }

        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        };
        Ok(tree
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, node)| node_entry(k, node))
            .collect())
    }

    async fn get_metadata(&self, path: &str) -> OperationResult<Entry> {
        self.begin("stat", path, format!("stat {}", path))?;
        let key = normalize(path);
        if key.is_empty() {
            return Ok(Entry::directory(""));
        }
        match self.store.read().tree().get(&key) {
            Some(node) => Ok(node_entry(&key, node)),
            None => Err(ProviderError::not_found(path)),
        }
    }

    async fn read(&self, path: &str) -> OperationResult<Bytes> {
        self.require(Capability::Read, "read")?;
        self.begin("read", path, format!("read {}", path))?;
        match self.store.read().tree().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(ProviderError::generic(
                "IsADirectory",
                format!("{} is a directory", path),
            )),
            None => Err(ProviderError::not_found(path)),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> OperationResult<()> {
        self.require(Capability::Write, "write")?;
        self.begin("write", path, format!("write {}", path))?;
        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        if let Some(Node::Dir { .. }) = tree.get(&key) {
            return Err(ProviderError::generic(
                "IsADirectory",
                format!("{} is a directory", path),
            ));
        }
        ensure_parents(tree, &key);
        tree.insert(
            key,
            Node::File {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> OperationResult<()> {
        self.require(Capability::Mkdir, "mkdir")?;
        self.begin("mkdir", path, format!("mkdir {}", path))?;
        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        if tree.contains_key(&key) {
            return Err(ProviderError::already_exists(path));
        }
        ensure_parents(tree, &key);
        tree.insert(
            key,
            Node::Dir {
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> OperationResult<()> {
        self.require(Capability::Delete, "delete")?;
        let record = if recursive {
            format!("delete -r {}", path)
        } else {
            format!("delete {}", path)
        };
        self.begin("delete", path, record)?;

        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        if !tree.contains_key(&key) {
            return Err(ProviderError::not_found(path));
        }
        let keys = subtree_keys(tree, &key);
        if keys.len() > 1 && !recursive {
            return Err(ProviderError::generic(
                "DirectoryNotEmpty",
                format!("{} is not empty", path),
            ));
        }
        for k in keys {
            tree.remove(&k);
        }
        Ok(())
    }

    async fn native_move(&self, src: &str, dst: &str) -> OperationResult<()> {
        self.require(Capability::Move, "move")?;
        self.begin("move", src, format!("move {} {}", src, dst))?;
        self.copy_subtree(src, dst, true)
    }

    async fn native_copy(&self, src: &str, dst: &str) -> OperationResult<()> {
        if !self
            .capabilities
            .snapshot()
            .contains_any(&[Capability::Copy, Capability::ServerSideCopy])
        {
            return Err(ProviderError::unimplemented("copy"));
        }
        self.begin("copy", src, format!("copy {} {}", src, dst))?;
        self.copy_subtree(src, dst, false)
    }

    async fn download_to_local(
        &self,
        remote: &str,
        local: &std::path::Path,
        options: &crate::transfer::BatchOptions,
    ) -> OperationResult<crate::transfer::BatchSummary> {
        self.require(Capability::Download, "download_to_local")?;
        crate::transfer::batch::download_tree(self, remote, local, options).await
    }

    async fn upload_from_local(
        &self,
        local: &std::path::Path,
        remote: &str,
        options: &crate::transfer::BatchOptions,
    ) -> OperationResult<crate::transfer::BatchSummary> {
        self.require(Capability::Upload, "upload_from_local")?;
        crate::transfer::batch::upload_tree(self, local, remote, options).await
    }

    fn multipart(&self) -> Option<&dyn MultipartTarget> {
        Some(self)
    }
}

#[async_trait]
impl MultipartTarget for MemoryProvider {
    async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()> {
        self.require(Capability::Write, "write")?;
        self.begin("write_single", path, format!("write_single {}", path))?;
        let key = normalize(path);
        let mut store = self.store.write();
        let tree = store.tree_mut();
        ensure_parents(tree, &key);
        tree.insert(
            key,
            Node::File {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn begin_multipart(&self, path: &str, _total_size: u64) -> OperationResult<String> {
        self.require(Capability::Write, "write")?;
        self.begin("multipart_begin", path, format!("multipart_begin {}", path))?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                path: normalize(path),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(&self, path: &str, upload_id: &str, part: UploadPart) -> OperationResult<()> {
        self.begin(
            "multipart_part",
            path,
            format!("multipart_part {} {}", path, part.number),
        )?;
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;
        upload.parts.insert(part.number, part.data);
        Ok(())
    }

    async fn complete_multipart(&self, path: &str, upload_id: &str, parts: u32) -> OperationResult<()> {
        self.begin(
            "multipart_complete",
            path,
            format!("multipart_complete {}", path),
        )?;
        let upload = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| ProviderError::generic("NoSuchUpload", upload_id.to_string()))?;
        if upload.parts.len() as u32 != parts {
            return Err(ProviderError::generic(
                "InvalidPart",
                format!("expected {} parts, got {}", parts, upload.parts.len()),
            ));
        }

        let mut body = BytesMut::new();
        for data in upload.parts.values() {
            body.extend_from_slice(data);
        }

        let mut store = self.store.write();
        let tree = store.tree_mut();
        ensure_parents(tree, &upload.path);
        tree.insert(
            upload.path,
            Node::File {
                data: body.freeze(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, path: &str, upload_id: &str) -> OperationResult<()> {
        self.begin("multipart_abort", path, format!("multipart_abort {}", path))?;
        match self.uploads.lock().remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::generic("NoSuchUpload", upload_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ErrorKind, OperationResultExt, ProviderExt};
    use crate::transfer::{ChunkedUploader, ChunkingConfig, UploadMode};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_direct_children_in_order() {
        let provider = MemoryProvider::new();
        provider.insert_file("docs/b.md", Bytes::from_static(b"b"));
        provider.insert_file("docs/a.md", Bytes::from_static(b"a"));
        provider.insert_file("docs/img/logo.png", Bytes::from_static(b"png"));
        provider.insert_file("top.txt", Bytes::new());

        let root: Vec<String> = provider.list("/").await.unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(root, vec!["docs/", "top.txt"]);

        let docs = provider.list("docs/").await.unwrap();
        let names: Vec<&str> = docs.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md", "img"]);
        assert_eq!(docs[0].size, Some(1));
        assert!(docs[2].is_directory());

        assert!(provider.list("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_capability_is_unimplemented() {
        let provider = MemoryProvider::with_capabilities(CapabilitySet::from([
            Capability::List,
            Capability::Read,
        ]));
        let result = provider.write("a.txt", Bytes::new()).await;
        assert!(result.is_unimplemented());
        assert!(provider.mkdir("d").await.is_unimplemented());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mkdir_and_delete_rules() {
        let provider = MemoryProvider::new();
        provider.mkdir("dir").await.unwrap();
        let err = provider.mkdir("dir/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        provider.insert_file("dir/f", Bytes::new());
        let err = provider.delete("dir", false).await.unwrap_err();
        assert_eq!(err.code(), "DirectoryNotEmpty");
        provider.delete("dir", true).await.unwrap();
        assert!(!provider.contains("dir/f"));
        assert!(provider.delete("dir", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let provider = MemoryProvider::new();
        provider.insert_file("a", Bytes::from_static(b"x"));
        provider.fail_times("read", "a", 2, ProviderError::connection_failed("flaky"));

        assert!(provider.read("a").await.is_err());
        assert!(provider.read("a").await.is_err());
        assert!(provider.read("a").await.is_ok());
        assert_eq!(provider.calls(), vec!["read a", "read a", "read a"]);
    }

    #[tokio::test]
    async fn test_containers() {
        let provider = MemoryProvider::new();
        provider.insert_file("a", Bytes::new());
        provider.add_container("archive");

        let names: Vec<String> = provider
            .list_containers()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["archive", "default"]);

        provider.set_container("archive").await.unwrap();
        assert_eq!(provider.current_container().as_deref(), Some("archive"));
        assert!(!provider.contains("a"));
        assert!(provider.set_container("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_move_directory_into_itself_rejected() {
        let provider = MemoryProvider::new();
        provider.insert_file("d/f", Bytes::new());
        let err = provider.move_path("d", "d/inner").await.unwrap_err();
        assert_eq!(err.code(), "InvalidDestination");
        assert!(provider.contains("d/f"));
    }

    #[tokio::test]
    async fn test_concurrent_connect_single_flight() {
        let provider = Arc::new(MemoryProvider::new());
        provider.set_connect_delay(Duration::from_millis(20));
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);

        let (a, b) = tokio::join!(provider.connect(), provider.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.connect_attempts(), 1);
        assert!(provider.is_connected());
    }

    #[tokio::test]
    async fn test_chunked_upload_through_multipart_hook() {
        let provider = MemoryProvider::new();
        let uploader = ChunkedUploader::new(ChunkingConfig::new(8, 4));
        let data = Bytes::from_static(b"0123456789");

        let mode = uploader
            .upload_to(&provider, "big.bin", data.clone(), None)
            .await
            .unwrap();
        assert_eq!(mode, UploadMode::Multipart { parts: 3 });
        assert_eq!(provider.file_contents("big.bin").unwrap(), data);
        assert_eq!(
            provider.calls(),
            vec![
                "multipart_begin big.bin",
                "multipart_part big.bin 1",
                "multipart_part big.bin 2",
                "multipart_part big.bin 3",
                "multipart_complete big.bin",
            ]
        );
    }

    #[tokio::test]
    async fn test_read_only_toggle() {
        let provider = MemoryProvider::new();
        provider.set_read_only(true);
        assert!(!provider.has_capability(Capability::Write));
        assert!(provider.has_capability(Capability::Read));

        let err = provider.write("a.txt", Bytes::from_static(b"x")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unimplemented);
        assert!(provider.calls().is_empty());

        provider.set_read_only(false);
        provider.write("a.txt", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(provider.calls(), vec!["write a.txt"]);
    }
}
