//! Retry decorator for providers
//!
//! [`ResilientProvider`] wraps every primitive call of the inner provider in
//! a [`Retrier`] whose predicate is the inner provider's own
//! `is_retryable`. Backends never loop on failures themselves.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::provider::{
    Capability, CapabilitySet, ConnectionState, Entry, OperationResult, ProviderError,
    ProviderType, StorageProvider,
};
use crate::transfer::{
    batch, BatchOptions, BatchSummary, MultipartTarget, Retrier, RetryPolicy, UploadPart,
};

/// Provider decorator adding retry with exponential backoff
pub struct ResilientProvider<P: StorageProvider + ?Sized> {
    inner: Arc<P>,
    retrier: Retrier,
}

impl<P: StorageProvider + ?Sized + 'static> ResilientProvider<P> {
    pub fn new(inner: Arc<P>, policy: RetryPolicy) -> Self {
        let judge = inner.clone();
        let retrier = Retrier::new(policy)
            .with_predicate(Arc::new(move |err: &ProviderError| judge.is_retryable(err)));
        Self { inner, retrier }
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.retrier.policy()
    }
}

#[async_trait]
impl<P: StorageProvider + ?Sized + 'static> StorageProvider for ResilientProvider<P> {
    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }

    fn display_name(&self) -> String {
        self.inner.display_name()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.inner.capabilities()
    }

    async fn connect(&self) -> OperationResult<()> {
        self.retrier.run("connect", || self.inner.connect()).await
    }

    async fn disconnect(&self) -> OperationResult<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    fn current_container(&self) -> Option<String> {
        self.inner.current_container()
    }

    async fn set_container(&self, name: &str) -> OperationResult<()> {
        self.inner.set_container(name).await
    }

    async fn list_containers(&self) -> OperationResult<Vec<Entry>> {
        self.retrier
            .run("list_containers", || self.inner.list_containers())
            .await
    }

    async fn list(&self, path: &str) -> OperationResult<Vec<Entry>> {
        self.retrier.run("list", || self.inner.list(path)).await
    }

    async fn get_metadata(&self, path: &str) -> OperationResult<Entry> {
        self.retrier
            .run("get_metadata", || self.inner.get_metadata(path))
            .await
    }

    async fn read(&self, path: &str) -> OperationResult<Bytes> {
        self.retrier.run("read", || self.inner.read(path)).await
    }

    async fn write(&self, path: &str, data: Bytes) -> OperationResult<()> {
        self.retrier
            .run("write", || self.inner.write(path, data.clone()))
            .await
    }

    async fn mkdir(&self, path: &str) -> OperationResult<()> {
        self.retrier.run("mkdir", || self.inner.mkdir(path)).await
    }

    async fn delete(&self, path: &str, recursive: bool) -> OperationResult<()> {
        self.retrier
            .run("delete", || self.inner.delete(path, recursive))
            .await
    }

    async fn native_move(&self, src: &str, dst: &str) -> OperationResult<()> {
        self.retrier
            .run("move", || self.inner.native_move(src, dst))
            .await
    }

    async fn native_copy(&self, src: &str, dst: &str) -> OperationResult<()> {
        self.retrier
            .run("copy", || self.inner.native_copy(src, dst))
            .await
    }

    /// Runs the recursive download over the retried primitives
    async fn download_to_local(
        &self,
        remote: &str,
        local: &Path,
        options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        if !self.inner.has_capability(Capability::Download) {
            return Err(ProviderError::unimplemented("download_to_local"));
        }
        batch::download_tree(self, remote, local, options).await
    }

    async fn upload_from_local(
        &self,
        local: &Path,
        remote: &str,
        options: &BatchOptions,
    ) -> OperationResult<BatchSummary> {
        if !self.inner.has_capability(Capability::Upload) {
            return Err(ProviderError::unimplemented("upload_from_local"));
        }
        batch::upload_tree(self, local, remote, options).await
    }

    fn is_retryable(&self, err: &ProviderError) -> bool {
        self.inner.is_retryable(err)
    }

    fn multipart(&self) -> Option<&dyn MultipartTarget> {
        self.inner.multipart().map(|_| self as &dyn MultipartTarget)
    }
}

#[async_trait]
impl<P: StorageProvider + ?Sized + 'static> MultipartTarget for ResilientProvider<P> {
    async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()> {
        let target = self
            .inner
            .multipart()
            .ok_or_else(|| ProviderError::unimplemented("multipart upload"))?;
        self.retrier
            .run("write_single", || target.write_single(path, data.clone()))
            .await
    }

    async fn begin_multipart(&self, path: &str, total_size: u64) -> OperationResult<String> {
        let target = self
            .inner
            .multipart()
            .ok_or_else(|| ProviderError::unimplemented("multipart upload"))?;
        self.retrier
            .run("begin_multipart", || target.begin_multipart(path, total_size))
            .await
    }

    async fn upload_part(&self, path: &str, upload_id: &str, part: UploadPart) -> OperationResult<()> {
        let target = self
            .inner
            .multipart()
            .ok_or_else(|| ProviderError::unimplemented("multipart upload"))?;
        self.retrier
            .run("upload_part", || target.upload_part(path, upload_id, part.clone()))
            .await
    }

    async fn complete_multipart(&self, path: &str, upload_id: &str, parts: u32) -> OperationResult<()> {
        let target = self
            .inner
            .multipart()
            .ok_or_else(|| ProviderError::unimplemented("multipart upload"))?;
        self.retrier
            .run("complete_multipart", || {
                target.complete_multipart(path, upload_id, parts)
            })
            .await
    }

    /// Not retried; abort is best effort
    async fn abort_multipart(&self, path: &str, upload_id: &str) -> OperationResult<()> {
        match self.inner.multipart() {
            Some(target) => target.abort_multipart(path, upload_id).await,
            None => Err(ProviderError::unimplemented("multipart upload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ErrorKind, ProviderExt};
    use crate::providers::memory::MemoryProvider;

    fn wrapped() -> (Arc<MemoryProvider>, ResilientProvider<MemoryProvider>) {
        let inner = Arc::new(MemoryProvider::new());
        inner.insert_file("a.txt", Bytes::from_static(b"hello"));
        let provider = ResilientProvider::new(inner.clone(), RetryPolicy::new(3).with_jitter(0.0));
        (inner, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (inner, provider) = wrapped();
        inner.fail_next(
            "read",
            "a.txt",
            ProviderError::connection_failed("reset").with_retryable(true),
        );

        let data = provider.read("a.txt").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert_eq!(inner.calls(), vec!["read a.txt", "read a.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_propagates_once() {
        let (inner, provider) = wrapped();
        inner.fail_next(
            "write",
            "b.txt",
            ProviderError::generic("QuotaExceeded", "full"),
        );

        let err = provider.write("b.txt", Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), "QuotaExceeded");
        assert_eq!(inner.calls(), vec!["write b.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_never_retried() {
        let (inner, provider) = wrapped();
        let err = provider.read("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(inner.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_steps_are_retried_individually() {
        let inner = Arc::new(MemoryProvider::with_capabilities(CapabilitySet::from([
            Capability::Copy,
            Capability::Delete,
        ])));
        inner.insert_file("a.txt", Bytes::from_static(b"x"));
        inner.fail_next(
            "delete",
            "a.txt",
            ProviderError::connection_failed("timeout").with_retryable(true),
        );
        let provider = ResilientProvider::new(inner.clone(), RetryPolicy::new(2).with_jitter(0.0));

        provider.move_path("a.txt", "b.txt").await.unwrap();
        assert_eq!(
            inner.calls(),
            vec!["copy a.txt b.txt", "delete a.txt", "delete a.txt"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_multipart_calls_go_through_wrapper() {
        let (inner, provider) = wrapped();
        inner.fail_next(
            "multipart_part",
            "big",
            ProviderError::connection_failed("reset").with_retryable(true),
        );
        let uploader = crate::transfer::ChunkedUploader::new(crate::transfer::ChunkingConfig::new(4, 4));
        uploader
            .upload_to(&provider, "big", Bytes::from_static(b"12345678"), None)
            .await
            .unwrap();
        assert_eq!(inner.file_contents("big").unwrap(), Bytes::from_static(b"12345678"));
    }
}
