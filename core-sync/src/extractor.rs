//! Chained metadata extraction.
//!
//! [`ChainedExtractor`] asks every applicable extractor in turn and merges
//! what they found. Earlier extractors win: later ones only fill fields that
//! are still empty, add tags not yet present and add raw keys that are missing.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    ExtractedMetadata, FileInfo, MetadataExtractor, ProgressSink,
};
use core_async::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Default)]
pub struct ChainedExtractor {
    extractors: Vec<Arc<dyn MetadataExtractor>>,
}

impl ChainedExtractor {
    pub fn new(extractors: Vec<Arc<dyn MetadataExtractor>>) -> Self {
        Self { extractors }
    }

    pub fn with(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

#[async_trait]
impl MetadataExtractor for ChainedExtractor {
    async fn extract(
        &self,
        cancel: &CancellationToken,
        file: &FileInfo,
        progress: &ProgressSink,
    ) -> Result<ExtractedMetadata> {
        let mut merged = ExtractedMetadata::default();
        let mut succeeded = 0usize;
        let mut last_error: Option<BridgeError> = None;

        for (index, extractor) in self.extractors.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            if !extractor.can_extract(file) {
                continue;
            }

            match extractor.extract(cancel, file, progress).await {
                Ok(found) => {
                    fill_gaps(&mut merged, found);
                    succeeded += 1;
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(index, path = %file.path.display(), error = %err, "Extractor failed, trying next");
                    last_error = Some(err);
                }
            }
        }

        match (succeeded, last_error) {
            (0, Some(err)) => Err(err),
            _ => Ok(merged),
        }
    }

    fn can_extract(&self, file: &FileInfo) -> bool {
        self.extractors.iter().any(|extractor| extractor.can_extract(file))
    }
}

fn fill_gaps(target: &mut ExtractedMetadata, source: ExtractedMetadata) {
    fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
        if slot.is_none() {
            *slot = value;
        }
    }

    let ExtractedMetadata {
        created_at,
        capture_device,
        location,
        title,
        description,
        tags,
        raw,
    } = source;

    fill(&mut target.created_at, created_at);
    fill(&mut target.capture_device, capture_device);
    fill(&mut target.location, location);
    fill(&mut target.description, description);
    if target.title().is_none() && title.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        target.title = title;
    }

    for tag in tags {
        if !target.tags.contains(&tag) {
            target.tags.push(tag);
        }
    }
    for (key, value) in raw {
        target.raw.entry(key).or_insert(value);
    }
}
