//! Cloud upload contract.

use std::path::Path;

use async_trait::async_trait;
use core_async::sync::CancellationToken;

use crate::{
    error::Result,
    model::{ExtractedMetadata, FileInfo, UploadResult},
    progress::ProgressSink,
};

/// Moves local content into durable cloud storage.
///
/// The uploader owns content-hash deduplication: when identical content is
/// already stored it returns `UploadResult { deduplicated: true, .. }` with
/// the existing object's path instead of transferring bytes again.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `file` to `dest_path`.
    async fn upload(
        &self,
        cancel: &CancellationToken,
        file: &FileInfo,
        dest_path: &str,
        metadata: &ExtractedMetadata,
        progress: &ProgressSink,
    ) -> Result<UploadResult>;

    /// Path of an already stored object with this content hash, if any.
    async fn check_exists(&self, cancel: &CancellationToken, hash: &str) -> Result<Option<String>>;

    /// Remove the local copy of a synchronized file.
    async fn delete_local(&self, cancel: &CancellationToken, path: &Path) -> Result<()>;
}
