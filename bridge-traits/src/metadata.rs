//! Metadata extraction contract.

use async_trait::async_trait;
use core_async::sync::CancellationToken;

use crate::{
    error::Result,
    model::{ExtractedMetadata, FileInfo},
    progress::ProgressSink,
};

/// Reads descriptive metadata out of a local file.
///
/// Implementations are format parsers (EPUB, PDF, comic archives, EXIF...).
/// They should observe `cancel` during long reads and may report progress.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata from `file`.
    async fn extract(
        &self,
        cancel: &CancellationToken,
        file: &FileInfo,
        progress: &ProgressSink,
    ) -> Result<ExtractedMetadata>;

    /// Whether this extractor understands the file at all.
    fn can_extract(&self, file: &FileInfo) -> bool;
}
