//! Size-based chunked upload strategy
//!
//! Payloads below the threshold go through one `write_single` call. At or
//! above it they are split into fixed-size parts and uploaded through the
//! backend's multipart session. The threshold does not depend on the backend.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::progress::{emit, ProgressCallback, TransferProgress};
use super::retry::Retrier;
use crate::provider::{OperationResult, StorageProvider};

/// 8 MiB
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 8 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Chunking configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Payloads of this size or larger use the multipart path
    pub threshold_bytes: u64,
    /// Size of every part except possibly the last
    pub part_size_bytes: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_CHUNK_THRESHOLD,
            part_size_bytes: DEFAULT_PART_SIZE,
        }
    }
}

impl ChunkingConfig {
    pub fn new(threshold_bytes: u64, part_size_bytes: u64) -> Self {
        Self {
            threshold_bytes,
            part_size_bytes: part_size_bytes.max(1),
        }
    }
}

/// One part of a multipart upload
#[derive(Debug, Clone)]
pub struct UploadPart {
    /// 1-based part number
    pub number: u32,
    /// Byte offset of this part within the object
    pub offset: u64,
    pub data: Bytes,
}

/// Backend hooks for the chunked strategy
#[async_trait]
pub trait MultipartTarget: Send + Sync {
    async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()>;

    /// Open a multipart session, returning its upload id
    async fn begin_multipart(&self, path: &str, total_size: u64) -> OperationResult<String>;

    async fn upload_part(&self, path: &str, upload_id: &str, part: UploadPart)
        -> OperationResult<()>;

    async fn complete_multipart(&self, path: &str, upload_id: &str, parts: u32)
        -> OperationResult<()>;

    /// Discard partial server-side state. Best effort.
    async fn abort_multipart(&self, path: &str, upload_id: &str) -> OperationResult<()>;
}

/// Path chosen for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    SingleShot,
    Multipart { parts: u32 },
}

/// Uploads payloads using the single-shot or multipart path by size
#[derive(Debug, Clone, Default)]
pub struct ChunkedUploader {
    config: ChunkingConfig,
    retrier: Option<Retrier>,
}

impl ChunkedUploader {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            retrier: None,
        }
    }

    /// Retry individual parts instead of failing the whole upload
    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = Some(retrier);
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Empty payloads always go single-shot, whatever the threshold
    pub fn mode_for(&self, size: u64) -> UploadMode {
        if size == 0 || size < self.config.threshold_bytes {
            UploadMode::SingleShot
        } else {
            UploadMode::Multipart {
                parts: self.plan_parts(size).len() as u32,
            }
        }
    }

    /// `(offset, len)` of every part, in upload order
    pub fn plan_parts(&self, size: u64) -> Vec<(u64, u64)> {
        let part_size = self.config.part_size_bytes.max(1);
        let mut parts = Vec::new();
        let mut offset = 0;
        while offset < size {
            let len = part_size.min(size - offset);
            parts.push((offset, len));
            offset += len;
        }
        parts
    }

    /// Upload `data` to `path` through `target`
    pub async fn upload(
        &self,
        target: &dyn MultipartTarget,
        path: &str,
        data: Bytes,
        progress: Option<&ProgressCallback>,
    ) -> OperationResult<UploadMode> {
        let total = data.len() as u64;

        let mode = self.mode_for(total);
        if mode == UploadMode::SingleShot {
            emit(progress, TransferProgress::new(0, total, path));
            target.write_single(path, data).await?;
            emit(progress, TransferProgress::new(total, total, path));
            return Ok(mode);
        }

        let plan = self.plan_parts(total);
        let upload_id = target.begin_multipart(path, total).await?;
        info!(
            "Multipart upload {} started for {} ({} bytes, {} parts)",
            upload_id,
            path,
            total,
            plan.len()
        );

        match self.upload_parts(target, path, &upload_id, &data, &plan, progress).await {
            Ok(()) => {}
            Err(e) => {
                warn!("Multipart upload {} of {} failed: {}", upload_id, path, e);
                if let Err(abort_err) = target.abort_multipart(path, &upload_id).await {
                    warn!(
                        "Failed to abort multipart upload {} of {}: {}",
                        upload_id, path, abort_err
                    );
                }
                return Err(e);
            }
        }

        if let Err(e) = target
            .complete_multipart(path, &upload_id, plan.len() as u32)
            .await
        {
            if let Err(abort_err) = target.abort_multipart(path, &upload_id).await {
                warn!(
                    "Failed to abort multipart upload {} of {}: {}",
                    upload_id, path, abort_err
                );
            }
            return Err(e);
        }
        debug!("Multipart upload {} completed", upload_id);
        Ok(mode)
    }

    async fn upload_parts(
        &self,
        target: &dyn MultipartTarget,
        path: &str,
        upload_id: &str,
        data: &Bytes,
        plan: &[(u64, u64)],
        progress: Option<&ProgressCallback>,
    ) -> OperationResult<()> {
        let total = data.len() as u64;
        let mut transferred = 0;

        for (index, (offset, len)) in plan.iter().copied().enumerate() {
            let part = UploadPart {
                number: index as u32 + 1,
                offset,
                data: data.slice(offset as usize..(offset + len) as usize),
            };

            match &self.retrier {
                Some(retrier) => {
                    retrier
                        .run("upload_part", || {
                            target.upload_part(path, upload_id, part.clone())
                        })
                        .await?
                }
                None => target.upload_part(path, upload_id, part).await?,
            }

            transferred += len;
            emit(progress, TransferProgress::new(transferred, total, path));
        }
        Ok(())
    }

    /// Upload through the provider's multipart hook, or a plain `write` when
    /// the provider has none
    pub async fn upload_to(
        &self,
        provider: &dyn StorageProvider,
        path: &str,
        data: Bytes,
        progress: Option<&ProgressCallback>,
    ) -> OperationResult<UploadMode> {
        if let Some(target) = provider.multipart() {
            return self.upload(target, path, data, progress).await;
        }
        let total = data.len() as u64;
        emit(progress, TransferProgress::new(0, total, path));
        provider.write(path, data).await?;
        emit(progress, TransferProgress::new(total, total, path));
        Ok(UploadMode::SingleShot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ErrorKind, ProviderError};
    use crate::transfer::RetryPolicy;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingTarget {
        calls: Mutex<Vec<String>>,
        fail_part: Mutex<Option<u32>>,
        fail_abort: bool,
    }

    impl RecordingTarget {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl MultipartTarget for RecordingTarget {
        async fn write_single(&self, path: &str, data: Bytes) -> OperationResult<()> {
            self.calls.lock().push(format!("single {} {}", path, data.len()));
            Ok(())
        }

        async fn begin_multipart(&self, path: &str, _total: u64) -> OperationResult<String> {
            self.calls.lock().push(format!("begin {}", path));
            Ok("up-1".to_string())
        }

        async fn upload_part(&self, _path: &str, id: &str, part: UploadPart) -> OperationResult<()> {
            self.calls.lock().push(format!(
                "part {} {} @{} +{}",
                id,
                part.number,
                part.offset,
                part.data.len()
            ));
            let mut fail = self.fail_part.lock();
            if *fail == Some(part.number) {
                *fail = None;
                return Err(ProviderError::connection_failed("reset").with_retryable(true));
            }
            Ok(())
        }

        async fn complete_multipart(&self, _path: &str, id: &str, parts: u32) -> OperationResult<()> {
            self.calls.lock().push(format!("complete {} {}", id, parts));
            Ok(())
        }

        async fn abort_multipart(&self, _path: &str, id: &str) -> OperationResult<()> {
            self.calls.lock().push(format!("abort {}", id));
            if self.fail_abort {
                return Err(ProviderError::generic("NoSuchUpload", "gone"));
            }
            Ok(())
        }
    }

    fn collect() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let cb: ProgressCallback = Arc::new(move |p: &TransferProgress| sink.lock().push(p.clone()));
        (cb, events)
    }

    #[test]
    fn test_threshold_boundary() {
        let uploader = ChunkedUploader::new(ChunkingConfig::new(100, 40));
        assert_eq!(uploader.mode_for(99), UploadMode::SingleShot);
        assert_eq!(uploader.mode_for(100), UploadMode::Multipart { parts: 3 });
        assert_eq!(uploader.mode_for(0), UploadMode::SingleShot);
        assert_eq!(uploader.plan_parts(100), vec![(0, 40), (40, 40), (80, 20)]);
    }

    #[tokio::test]
    async fn test_empty_payload_with_zero_threshold_is_single_shot() {
        let target = RecordingTarget::default();
        let uploader = ChunkedUploader::new(ChunkingConfig::new(0, 40));
        assert_eq!(uploader.mode_for(0), UploadMode::SingleShot);
        assert_eq!(uploader.mode_for(1), UploadMode::Multipart { parts: 1 });

        let mode = uploader
            .upload(&target, "empty", Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(mode, UploadMode::SingleShot);
        assert_eq!(target.calls(), vec!["single empty 0"]);
    }

    #[tokio::test]
    async fn test_single_shot_reports_zero_then_full() {
        let target = RecordingTarget::default();
        let uploader = ChunkedUploader::new(ChunkingConfig::new(100, 40));
        let (cb, events) = collect();

        let mode = uploader
            .upload(&target, "small.bin", Bytes::from(vec![0u8; 99]), Some(&cb))
            .await
            .unwrap();

        assert_eq!(mode, UploadMode::SingleShot);
        assert_eq!(target.calls(), vec!["single small.bin 99"]);
        let pct: Vec<u8> = events.lock().iter().map(|p| p.percentage()).collect();
        assert_eq!(pct, vec![0, 100]);
    }

    #[tokio::test]
    async fn test_empty_payload_progress_is_zero() {
        let target = RecordingTarget::default();
        let uploader = ChunkedUploader::default();
        let (cb, events) = collect();
        uploader
            .upload(&target, "empty", Bytes::new(), Some(&cb))
            .await
            .unwrap();
        assert!(events.lock().iter().all(|p| p.percentage() == 0));
    }

    #[tokio::test]
    async fn test_multipart_progress_after_each_part() {
        let target = RecordingTarget::default();
        let uploader = ChunkedUploader::new(ChunkingConfig::new(100, 40));
        let (cb, events) = collect();

        uploader
            .upload(&target, "big.bin", Bytes::from(vec![1u8; 100]), Some(&cb))
            .await
            .unwrap();

        assert_eq!(
            target.calls(),
            vec![
                "begin big.bin",
                "part up-1 1 @0 +40",
                "part up-1 2 @40 +40",
                "part up-1 3 @80 +20",
                "complete up-1 3",
            ]
        );
        let bytes: Vec<u64> = events.lock().iter().map(|p| p.bytes_transferred).collect();
        assert_eq!(bytes, vec![40, 80, 100]);
        assert_eq!(events.lock().last().unwrap().percentage(), 100);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_and_keeps_original_error() {
        let target = RecordingTarget {
            fail_part: Mutex::new(Some(2)),
            fail_abort: true,
            ..Default::default()
        };
        let uploader = ChunkedUploader::new(ChunkingConfig::new(100, 40));

        let err = uploader
            .upload(&target, "big.bin", Bytes::from(vec![1u8; 120]), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        let calls = target.calls();
        assert_eq!(calls.last().unwrap(), "abort up-1");
        assert!(!calls.iter().any(|c| c.starts_with("complete")));
        assert!(!calls.iter().any(|c| c.starts_with("part up-1 3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrier_recovers_failed_part() {
        let target = RecordingTarget {
            fail_part: Mutex::new(Some(2)),
            ..Default::default()
        };
        let uploader = ChunkedUploader::new(ChunkingConfig::new(100, 40))
            .with_retrier(Retrier::new(RetryPolicy::new(3)));

        uploader
            .upload(&target, "big.bin", Bytes::from(vec![1u8; 120]), None)
            .await
            .unwrap();

        let calls = target.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("part up-1 2")).count(), 2);
        assert_eq!(calls.last().unwrap(), "complete up-1 3");
    }
}
