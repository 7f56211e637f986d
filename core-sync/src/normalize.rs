//! # Path Normalization
//!
//! Turns extracted metadata into safe, collision-free destination keys.
//!
//! ## Overview
//!
//! - [`PathTemplate`] substitutes `{placeholder}` values with per-placeholder
//!   defaults and sanitizers.
//! - [`sanitize_path`] and [`sanitize_filename`] strip characters that are
//!   unsafe in object keys or on common filesystems.
//! - [`validate_gcs_path`] enforces object-store key rules.
//! - [`CollisionResolver`] finds a free variant of a key by appending a
//!   numeric suffix before the extension.
//! - [`PathNormalizer`] is the seam the pipeline calls during approval.
//!
//! ## Usage
//!
//! ```
//! use core_sync::normalize::{sanitize_path, PathTemplate};
//! use std::collections::HashMap;
//!
//! let template = PathTemplate::new("print/books/{Author}/{Title}.{ext}")
//!     .with_default("Author", "Unknown Author")
//!     .with_sanitizer("Title", sanitize_path);
//!
//! let values = HashMap::from([
//!     ("Title".to_string(), "Dune: Messiah".to_string()),
//!     ("ext".to_string(), "epub".to_string()),
//! ]);
//! assert_eq!(
//!     template.execute(&values).unwrap(),
//!     "print/books/Unknown Author/Dune- Messiah.epub"
//! );
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bridge_traits::{ExtractedMetadata, FileInfo};
use core_async::sync::CancellationToken;
use core_async::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SyncError};

/// Longest destination key accepted, in UTF-8 bytes.
pub const MAX_OBJECT_KEY_BYTES: usize = 1024;

const RESERVED_PREFIX: &str = ".well-known/acme-challenge/";

pub const DEFAULT_COLLISION_SEPARATOR: &str = "_";
pub const DEFAULT_MAX_COLLISION_ATTEMPTS: u32 = 100;

// ============================================================================
// Normalizer Seam
// ============================================================================

/// A computed destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPath {
    /// Full destination key
    pub path: String,
    /// Everything before the final `/`
    pub directory: String,
    /// Final path component
    pub filename: String,
    /// Whether the uploader should deduplicate by content hash
    pub deduplication: bool,
}

impl NormalizedPath {
    pub fn new(path: impl Into<String>, deduplication: bool) -> Self {
        let path = path.into();
        let (directory, filename) = match path.rsplit_once('/') {
            Some((dir, file)) => (dir.to_string(), file.to_string()),
            None => (String::new(), path.clone()),
        };
        Self {
            path,
            directory,
            filename,
            deduplication,
        }
    }
}

/// Computes destination paths for approved files.
#[async_trait]
pub trait PathNormalizer: Send + Sync {
    async fn normalize(
        &self,
        cancel: &CancellationToken,
        file: &FileInfo,
        metadata: &ExtractedMetadata,
    ) -> Result<NormalizedPath>;
}

// ============================================================================
// Templates
// ============================================================================

type Sanitizer = Arc<dyn Fn(&str) -> String + Send + Sync>;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// A `{placeholder}` path pattern.
#[derive(Clone)]
pub struct PathTemplate {
    pattern: String,
    defaults: HashMap<String, String>,
    sanitizers: HashMap<String, Sanitizer>,
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sanitized: Vec<_> = self.sanitizers.keys().collect();
        sanitized.sort();
        f.debug_struct("PathTemplate")
            .field("pattern", &self.pattern)
            .field("defaults", &self.defaults)
            .field("sanitized", &sanitized)
            .finish()
    }
}

impl PathTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            defaults: HashMap::new(),
            sanitizers: HashMap::new(),
        }
    }

    /// Value used when `name` is missing or empty.
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Transform applied to the value (or default) of `name`.
    pub fn with_sanitizer<F>(mut self, name: impl Into<String>, sanitizer: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.sanitizers.insert(name.into(), Arc::new(sanitizer));
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for captures in placeholder_regex().captures_iter(&self.pattern) {
            let name = &captures[1];
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Substitute every placeholder in a single pass.
    ///
    /// # Errors
    ///
    /// `SyncError::MissingPlaceholder` when a placeholder has neither a
    /// supplied value nor a default. A supplied empty value is substituted
    /// as is.
    pub fn execute(&self, values: &HashMap<String, String>) -> Result<String> {
        let mut output = String::with_capacity(self.pattern.len());
        let mut last = 0;

        for captures in placeholder_regex().captures_iter(&self.pattern) {
            let whole = captures.get(0).ok_or_else(|| {
                SyncError::Internal("placeholder match without span".to_string())
            })?;
            let name = &captures[1];

            let value = values
                .get(name)
                .or_else(|| self.defaults.get(name))
                .ok_or_else(|| SyncError::MissingPlaceholder(name.to_string()))?;

            output.push_str(&self.pattern[last..whole.start()]);
            match self.sanitizers.get(name) {
                Some(sanitize) => output.push_str(&sanitize(value)),
                None => output.push_str(value),
            }
            last = whole.end();
        }

        output.push_str(&self.pattern[last..]);
        Ok(output)
    }
}

// ============================================================================
// Sanitizing & Validation
// ============================================================================

/// Make a single path segment safe.
///
/// Separators and `:`/`|` become `-`, double quotes become single quotes,
/// wildcard and redirection characters are dropped, whitespace runs collapse
/// to one space and the ends are trimmed.
pub fn sanitize_path(segment: &str) -> String {
    let replaced: String = segment
        .chars()
        .filter_map(|c| match c {
            '/' | '\\' | ':' | '|' => Some('-'),
            '"' => Some('\''),
            '*' | '?' | '<' | '>' => None,
            other => Some(other),
        })
        .collect();

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitize and cap a file name at `max_len` bytes, keeping the extension if it fits.
///
/// A `max_len` of zero disables truncation.
///
/// ```
/// use core_sync::normalize::sanitize_filename;
///
/// assert_eq!(sanitize_filename("archive.tar.gz", 10), "archive.gz");
/// ```
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let sanitized = sanitize_path(name);
    if max_len == 0 || sanitized.len() <= max_len {
        return sanitized;
    }

    let (stem, ext) = split_extension(&sanitized);
    if ext.len() >= max_len {
        return truncate_bytes(&sanitized, max_len).to_string();
    }

    let stem = truncate_bytes(stem, max_len - ext.len());
    format!("{stem}{ext}")
}

/// Validate a destination key against object-store naming rules.
pub fn validate_gcs_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SyncError::InvalidDestinationPath(
            "path must not be empty".to_string(),
        ));
    }
    if path.len() > MAX_OBJECT_KEY_BYTES {
        return Err(SyncError::InvalidDestinationPath(format!(
            "path is {} bytes, limit is {MAX_OBJECT_KEY_BYTES}",
            path.len()
        )));
    }
    if path.contains(['\r', '\n']) {
        return Err(SyncError::InvalidDestinationPath(
            "path must not contain line breaks".to_string(),
        ));
    }
    if path.starts_with(RESERVED_PREFIX) {
        return Err(SyncError::InvalidDestinationPath(format!(
            "path must not start with {RESERVED_PREFIX}"
        )));
    }
    Ok(())
}

/// Split at the last `.` of the final path component; the extension keeps its dot.
pub(crate) fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) => path.split_at(name_start + dot),
        None => (path, ""),
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Collision Resolution
// ============================================================================

type ExistsCheck = Arc<dyn Fn(String) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Finds a free destination key through an injected existence check.
#[derive(Clone)]
pub struct CollisionResolver {
    exists: ExistsCheck,
    separator: String,
    max_attempts: u32,
}

impl fmt::Debug for CollisionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollisionResolver")
            .field("separator", &self.separator)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl CollisionResolver {
    pub fn new<F, Fut>(exists: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            exists: Arc::new(move |path| Box::pin(exists(path))),
            separator: DEFAULT_COLLISION_SEPARATOR.to_string(),
            max_attempts: DEFAULT_MAX_COLLISION_ATTEMPTS,
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Return `base` when free, else the first free `name{sep}{n}{ext}`.
    ///
    /// # Errors
    ///
    /// Existence-check errors are returned as-is without retrying.
    /// `SyncError::MaxCollisionAttempts` when every candidate is taken.
    pub async fn resolve(&self, base: &str) -> Result<String> {
        if !(self.exists)(base.to_string()).await? {
            return Ok(base.to_string());
        }

        let (stem, ext) = split_extension(base);
        for attempt in 1..=self.max_attempts {
            let candidate = format!("{stem}{}{attempt}{ext}", self.separator);
            if !(self.exists)(candidate.clone()).await? {
                debug!(base, candidate = %candidate, attempt, "Resolved path collision");
                return Ok(candidate);
            }
        }

        Err(SyncError::MaxCollisionAttempts {
            base: base.to_string(),
            attempts: self.max_attempts,
        })
    }
}
