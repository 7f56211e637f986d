//! # Sync Data Model
//!
//! Records exchanged between the core and its collaborators.
//!
//! ## Overview
//!
//! - [`FileInfo`] describes a file found on local disk.
//! - [`ExtractedMetadata`] is what a metadata extractor produced for it.
//! - [`SyncSession`] groups one extraction run and carries its [`SessionStats`].
//! - [`SyncFile`] is the persisted per-file record whose [`FileStatus`] moves
//!   through the review workflow.
//!
//! Persisted records only keep the [`FileMetadata`] subset of what was
//! extracted. From the moment a file reaches `Extracted` the persisted record
//! is the sole source of truth; later phases rebuild what they need from it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BridgeError::InvalidValue(format!("session id {s}: {e}")))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for a persisted file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Create a new random file ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a file ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BridgeError::InvalidValue(format!("file id {s}: {e}")))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Where a file is in the review workflow.
///
/// Legal moves between these states are enforced by the core, not by stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Record created, extraction not started
    Pending,
    /// Metadata extraction in progress
    Extracting,
    /// Metadata extracted, waiting for review
    Extracted,
    /// Reviewer declined the file
    Rejected,
    /// Local copy removed after a successful sync
    Trashed,
    /// Upload in progress
    Uploading,
    /// Content stored at the destination
    Uploaded,
    /// Identical content already existed at the destination
    Skipped,
    /// Extraction or upload failed
    Error,
}

impl FileStatus {
    /// All statuses, in workflow order.
    pub const ALL: [FileStatus; 9] = [
        FileStatus::Pending,
        FileStatus::Extracting,
        FileStatus::Extracted,
        FileStatus::Rejected,
        FileStatus::Trashed,
        FileStatus::Uploading,
        FileStatus::Uploaded,
        FileStatus::Skipped,
        FileStatus::Error,
    ];

    /// Get the string representation for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Extracting => "extracting",
            FileStatus::Extracted => "extracted",
            FileStatus::Rejected => "rejected",
            FileStatus::Trashed => "trashed",
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Skipped => "skipped",
            FileStatus::Error => "error",
        }
    }
}

impl FromStr for FileStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BridgeError::InvalidValue(format!("file status {s}")))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl FromStr for SessionStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(BridgeError::InvalidValue(format!("session status {s}"))),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Discovery & Extraction
// ============================================================================

/// A file found on local disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the discovery root
    pub relative_path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the platform reports one
    pub modified_at: Option<DateTime<Utc>>,
    /// Hex-encoded SHA-256 of the content, empty when hashing was disabled
    pub hash: String,
    /// MIME type guessed from the extension
    pub mime_type: String,
}

impl FileInfo {
    /// Lowercase extension without the leading dot.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// File name without its extension.
    pub fn stem(&self) -> Option<String> {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Metadata produced by an extractor.
///
/// Format-specific fields live in `raw`; well-known print keys are `author`,
/// `isbn`, `publisher`, `publish_date`, `series` and `volume`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub capture_device: Option<String>,
    pub location: Option<GeoLocation>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub raw: HashMap<String, serde_json::Value>,
}

impl ExtractedMetadata {
    /// Non-empty string value of a raw key.
    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw
            .get(key)
            .and_then(|value| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }

    /// Non-empty title.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|title| !title.trim().is_empty())
    }
}

// ============================================================================
// Persisted Records
// ============================================================================

/// Metadata subset kept on the persisted file record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    /// Remaining string-valued raw fields such as `series` or `volume`
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

const NAMED_RAW_KEYS: [&str; 4] = ["author", "isbn", "publisher", "publish_date"];

impl From<&ExtractedMetadata> for FileMetadata {
    fn from(metadata: &ExtractedMetadata) -> Self {
        let extra = metadata
            .raw
            .iter()
            .filter(|(key, _)| !NAMED_RAW_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
            .collect();

        Self {
            title: metadata.title().map(str::to_string),
            author: metadata.raw_str("author").map(str::to_string),
            isbn: metadata.raw_str("isbn").map(str::to_string),
            publisher: metadata.raw_str("publisher").map(str::to_string),
            publish_date: metadata.raw_str("publish_date").map(str::to_string),
            extra,
        }
    }
}

impl FileMetadata {
    /// Rebuild extractor-shaped metadata from what was persisted.
    pub fn to_extracted(&self) -> ExtractedMetadata {
        let mut raw: HashMap<String, serde_json::Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect();

        let named = [
            ("author", &self.author),
            ("isbn", &self.isbn),
            ("publisher", &self.publisher),
            ("publish_date", &self.publish_date),
        ];
        for (key, value) in named {
            if let Some(value) = value {
                raw.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        }

        ExtractedMetadata {
            title: self.title.clone(),
            raw,
            ..ExtractedMetadata::default()
        }
    }
}

/// Per-session counters.
///
/// Values only grow during a session. A failed persistence attempt never
/// rolls them back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub discovered: u64,
    pub extracted: u64,
    pub approved: u64,
    pub rejected: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl SessionStats {
    pub fn total_ops(&self) -> u64 {
        self.discovered
            + self.extracted
            + self.approved
            + self.rejected
            + self.uploaded
            + self.skipped
            + self.errors
    }
}

/// One extraction run and its review outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    pub user_id: String,
    pub status: SessionStatus,
    pub root_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

impl SyncSession {
    /// Start a new running session.
    pub fn start(user_id: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            status: SessionStatus::Running,
            root_dir: root_dir.into(),
            started_at: Utc::now(),
            completed_at: None,
            stats: SessionStats::default(),
        }
    }
}

/// Persisted per-file record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFile {
    pub id: FileId,
    pub user_id: String,
    pub session_id: SessionId,
    pub local_path: PathBuf,
    /// Destination key, assigned once the file has been normalized for upload
    pub destination_path: Option<String>,
    pub hash: String,
    pub status: FileStatus,
    pub metadata: FileMetadata,
    /// Text of the most recent failure
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncFile {
    /// Create a pending record for a discovered file.
    pub fn pending(user_id: impl Into<String>, session_id: SessionId, file: &FileInfo) -> Self {
        Self {
            id: FileId::new(),
            user_id: user_id.into(),
            session_id,
            local_path: file.path.clone(),
            destination_path: None,
            hash: file.hash.clone(),
            status: FileStatus::Pending,
            metadata: FileMetadata::default(),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild the file description from the persisted fields.
    ///
    /// Only path and hash survive persistence; size, timestamps and MIME type
    /// are left at their defaults.
    pub fn to_file_info(&self) -> FileInfo {
        FileInfo {
            path: self.local_path.clone(),
            relative_path: self.local_path.clone(),
            hash: self.hash.clone(),
            ..FileInfo::default()
        }
    }
}

// ============================================================================
// Upload
// ============================================================================

/// Outcome of an upload attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    /// Final destination key; for deduplicated uploads, the existing object
    pub path: String,
    pub bytes_uploaded: u64,
    /// Identical content already existed so nothing was transferred
    pub deduplicated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_status_round_trip() {
        for status in FileStatus::ALL {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert_eq!("failed".parse::<SessionStatus>().unwrap(), SessionStatus::Failed);
    }

    #[test]
    fn test_id_parse() {
        let id = SessionId::new();
        assert_eq!(SessionId::from_string(&id.as_str()).unwrap(), id);
        assert!(FileId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_file_metadata_keeps_print_fields() {
        let mut extracted = ExtractedMetadata {
            title: Some("The Hobbit".to_string()),
            ..Default::default()
        };
        extracted.raw.insert("author".into(), "Tolkien".into());
        extracted.raw.insert("series".into(), "Middle-earth".into());
        extracted.raw.insert("pages".into(), serde_json::json!(310));

        let stored = FileMetadata::from(&extracted);
        assert_eq!(stored.title.as_deref(), Some("The Hobbit"));
        assert_eq!(stored.author.as_deref(), Some("Tolkien"));
        assert_eq!(stored.extra.get("series").map(String::as_str), Some("Middle-earth"));
        assert!(!stored.extra.contains_key("pages"));

        let rebuilt = stored.to_extracted();
        assert_eq!(rebuilt.title(), Some("The Hobbit"));
        assert_eq!(rebuilt.raw_str("author"), Some("Tolkien"));
        assert_eq!(rebuilt.raw_str("series"), Some("Middle-earth"));
        assert!(rebuilt.raw.get("pages").is_none());
    }

    #[test]
    fn test_blank_title_is_absent() {
        let extracted = ExtractedMetadata {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(extracted.title(), None);
        assert_eq!(FileMetadata::from(&extracted).title, None);
    }

    #[test]
    fn test_file_info_from_record_is_minimal() {
        let file = FileInfo {
            path: PathBuf::from("/books/hobbit.epub"),
            relative_path: PathBuf::from("hobbit.epub"),
            size: 42,
            hash: "abc".into(),
            mime_type: "application/epub+zip".into(),
            ..Default::default()
        };
        let record = SyncFile::pending("user", SessionId::new(), &file);
        assert_eq!(record.status, FileStatus::Pending);

        let rebuilt = record.to_file_info();
        assert_eq!(rebuilt.path, file.path);
        assert_eq!(rebuilt.relative_path, file.path);
        assert_eq!(rebuilt.hash, "abc");
        assert_eq!(rebuilt.size, 0);
        assert_eq!(rebuilt.extension().as_deref(), Some("epub"));
        assert_eq!(rebuilt.stem().as_deref(), Some("hobbit"));
    }

    #[test]
    fn test_stats_total_ops() {
        let stats = SessionStats {
            discovered: 3,
            extracted: 2,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_ops(), 6);
    }
}
