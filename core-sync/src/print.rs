//! # Print Media Normalizer
//!
//! Destination layout for books and comics.
//!
//! ```text
//! print/books/{Author}/{Title}.{ext}
//! print/comics/{Publisher}/{Series}/{Volume}.{ext}
//! print/unsorted/{filename}
//! ```
//!
//! Comics are recognised by a `.cbz`/`.cbr` extension or a `series` field;
//! books by a title. Everything else lands in `unsorted` under its original
//! (sanitized) file name.

use std::collections::HashMap;

use async_trait::async_trait;
use bridge_traits::{ExtractedMetadata, FileInfo};
use core_async::sync::CancellationToken;
use tracing::debug;

use crate::normalize::{
    sanitize_filename, sanitize_path, validate_gcs_path, CollisionResolver, NormalizedPath,
    PathNormalizer, PathTemplate,
};
use crate::{Result, SyncError};

const BOOK_TEMPLATE: &str = "print/books/{Author}/{Title}.{ext}";
const COMIC_TEMPLATE: &str = "print/comics/{Publisher}/{Series}/{Volume}.{ext}";
const UNSORTED_TEMPLATE: &str = "print/unsorted/{filename}";

const COMIC_EXTENSIONS: [&str; 2] = ["cbz", "cbr"];
const MAX_FILENAME_BYTES: usize = 255;

/// What kind of print item a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintKind {
    Book,
    Comic,
    Unknown,
}

/// Classify a file from its extension and metadata.
pub fn detect_kind(file: &FileInfo, metadata: &ExtractedMetadata) -> PrintKind {
    let is_comic_ext = file
        .extension()
        .is_some_and(|ext| COMIC_EXTENSIONS.contains(&ext.as_str()));

    if is_comic_ext || metadata.raw_str("series").is_some() {
        PrintKind::Comic
    } else if metadata.title().is_some() {
        PrintKind::Book
    } else {
        PrintKind::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct PrintPathNormalizer {
    books: PathTemplate,
    comics: PathTemplate,
    unsorted: PathTemplate,
    resolver: Option<CollisionResolver>,
}

impl Default for PrintPathNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PrintPathNormalizer {
    pub fn new() -> Self {
        let books = PathTemplate::new(BOOK_TEMPLATE)
            .with_default("Author", "Unknown Author")
            .with_sanitizer("Author", sanitize_path)
            .with_sanitizer("Title", sanitize_path);

        let comics = PathTemplate::new(COMIC_TEMPLATE)
            .with_default("Publisher", "Unknown Publisher")
            .with_default("Series", "Unknown Series")
            .with_default("Volume", "Unknown Volume")
            .with_sanitizer("Publisher", sanitize_path)
            .with_sanitizer("Series", sanitize_path)
            .with_sanitizer("Volume", sanitize_path);

        let unsorted = PathTemplate::new(UNSORTED_TEMPLATE)
            .with_sanitizer("filename", |name| sanitize_filename(name, MAX_FILENAME_BYTES));

        Self {
            books,
            comics,
            unsorted,
            resolver: None,
        }
    }

    /// Resolve collisions against existing destination keys.
    pub fn with_collision_resolver(mut self, resolver: CollisionResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn render(&self, file: &FileInfo, metadata: &ExtractedMetadata) -> Result<String> {
        let ext = file.extension().unwrap_or_else(|| "unknown".to_string());
        let mut values = HashMap::from([("ext".to_string(), ext)]);
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                values.insert(key.to_string(), value.to_string());
            }
        };

        match detect_kind(file, metadata) {
            PrintKind::Book => {
                put("Author", metadata.raw_str("author"));
                let stem = file.stem();
                put("Title", metadata.title().or(stem.as_deref()));
                self.books.execute(&values)
            }
            PrintKind::Comic => {
                put("Publisher", metadata.raw_str("publisher"));
                put("Series", metadata.raw_str("series"));
                put("Volume", metadata.raw_str("volume"));
                self.comics.execute(&values)
            }
            PrintKind::Unknown => {
                let filename = file
                    .path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| {
                        SyncError::InvalidDestinationPath(format!(
                            "{} has no usable file name",
                            file.path.display()
                        ))
                    })?;
                put("filename", Some(filename));
                self.unsorted.execute(&values)
            }
        }
    }
}

#[async_trait]
impl PathNormalizer for PrintPathNormalizer {
    async fn normalize(
        &self,
        cancel: &CancellationToken,
        file: &FileInfo,
        metadata: &ExtractedMetadata,
    ) -> Result<NormalizedPath> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut path = self.render(file, metadata)?;
        if let Some(resolver) = &self.resolver {
            path = resolver.resolve(&path).await?;
        }
        validate_gcs_path(&path)?;

        debug!(path = %path, "Normalized destination");
        Ok(NormalizedPath::new(path, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            relative_path: PathBuf::from(path),
            ..Default::default()
        }
    }

    fn metadata(title: Option<&str>, raw: &[(&str, &str)]) -> ExtractedMetadata {
        ExtractedMetadata {
            title: title.map(str::to_string),
            raw: raw
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
                .collect(),
            ..Default::default()
        }
    }

    async fn normalize(normalizer: &PrintPathNormalizer, f: &FileInfo, m: &ExtractedMetadata) -> Result<NormalizedPath> {
        normalizer.normalize(&CancellationToken::new(), f, m).await
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(&file("/x/a.cbz"), &metadata(None, &[])), PrintKind::Comic);
        assert_eq!(
            detect_kind(&file("/x/a.pdf"), &metadata(Some("T"), &[("series", "S")])),
            PrintKind::Comic
        );
        assert_eq!(detect_kind(&file("/x/a.epub"), &metadata(Some("T"), &[])), PrintKind::Book);
        assert_eq!(detect_kind(&file("/x/a.pdf"), &metadata(None, &[])), PrintKind::Unknown);
    }

    #[tokio::test]
    async fn test_book_path() {
        let normalizer = PrintPathNormalizer::new();
        let result = normalize(
            &normalizer,
            &file("/books/hobbit.EPUB"),
            &metadata(Some("The Hobbit"), &[("author", "Tolkien")]),
        )
        .await
        .unwrap();

        assert_eq!(result.path, "print/books/Tolkien/The Hobbit.epub");
        assert_eq!(result.directory, "print/books/Tolkien");
        assert_eq!(result.filename, "The Hobbit.epub");
        assert!(result.deduplication);
    }

    #[tokio::test]
    async fn test_book_without_author_and_unsafe_title() {
        let normalizer = PrintPathNormalizer::new();
        let result = normalize(
            &normalizer,
            &file("/books/x.pdf"),
            &metadata(Some("Why? Because: Reasons"), &[]),
        )
        .await
        .unwrap();
        assert_eq!(result.path, "print/books/Unknown Author/Why Because- Reasons.pdf");
    }

    #[tokio::test]
    async fn test_comic_defaults() {
        let normalizer = PrintPathNormalizer::new();
        let result = normalize(&normalizer, &file("/c/issue.cbr"), &metadata(None, &[("publisher", "Image")]))
            .await
            .unwrap();
        assert_eq!(result.path, "print/comics/Image/Unknown Series/Unknown Volume.cbr");
    }

    #[tokio::test]
    async fn test_unsorted_keeps_file_name() {
        let normalizer = PrintPathNormalizer::new();
        let result = normalize(&normalizer, &file("/misc/scan 01.pdf"), &metadata(None, &[]))
            .await
            .unwrap();
        assert_eq!(result.path, "print/unsorted/scan 01.pdf");
    }

    #[tokio::test]
    async fn test_missing_extension() {
        let normalizer = PrintPathNormalizer::new();
        let result = normalize(&normalizer, &file("/books/README"), &metadata(Some("Readme"), &[]))
            .await
            .unwrap();
        assert_eq!(result.path, "print/books/Unknown Author/Readme.unknown");
    }

    #[tokio::test]
    async fn test_collision_resolver_applied() {
        let normalizer = PrintPathNormalizer::new().with_collision_resolver(CollisionResolver::new(
            |path: String| async move {
                Ok::<bool, SyncError>(path == "print/books/Tolkien/The Hobbit.epub")
            },
        ));
        let result = normalize(
            &normalizer,
            &file("/books/hobbit.epub"),
            &metadata(Some("The Hobbit"), &[("author", "Tolkien")]),
        )
        .await
        .unwrap();
        assert_eq!(result.path, "print/books/Tolkien/The Hobbit_1.epub");
    }

    #[tokio::test]
    async fn test_overlong_path_rejected() {
        let normalizer = PrintPathNormalizer::new();
        let title = "t".repeat(1100);
        let err = normalize(&normalizer, &file("/b/x.epub"), &metadata(Some(&title), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidDestinationPath(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_work() {
        let normalizer = PrintPathNormalizer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = normalizer
            .normalize(&cancel, &file("/b/x.epub"), &metadata(Some("X"), &[]))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
