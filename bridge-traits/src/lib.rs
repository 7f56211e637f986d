//! # Host Bridge Traits
//!
//! Contracts between the sync core and the collaborators a host must provide.
//!
//! ## Overview
//!
//! The core orchestrates discovery, extraction, review and upload but does not
//! parse file formats, talk to cloud storage or own a database. Those are
//! supplied by the host through the traits in this crate, together with the
//! data model they exchange.
//!
//! ## Traits
//!
//! ### Pipeline collaborators
//! - [`Discoverer`](discovery::Discoverer) - Walk a local tree and stream candidate files
//! - [`MetadataExtractor`](metadata::MetadataExtractor) - Read format metadata from a file
//! - [`Uploader`](upload::Uploader) - Store content remotely with hash deduplication
//!
//! ### Persistence
//! - [`SessionStore`](store::SessionStore) - Sync sessions and their counters
//! - [`FileStore`](store::FileStore) - Per-file review records
//!
//! ### Utilities
//! - [`ProgressSink`](progress::ProgressSink) - Non-blocking progress delivery
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core refuses to start when a required collaborator is missing:
//!
//! ```ignore
//! let pipeline = Pipeline::builder()
//!     .discoverer(discoverer)
//!     .extractor(extractor)
//!     .build()?; // Err(SyncError::Config("normalizer is required"))
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert backend errors into it with enough context (paths, ids) to be
//! actionable, and report cooperative cancellation as `BridgeError::Cancelled`.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the core shares collaborators
//! across concurrent extraction workers.

pub mod discovery;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod progress;
pub mod store;
pub mod upload;

pub use error::BridgeError;

pub use discovery::{Discoverer, DiscoveryStreams};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use metadata::MetadataExtractor;
pub use model::{
    ExtractedMetadata, FileId, FileInfo, FileMetadata, FileStatus, GeoLocation, SessionId,
    SessionStats, SessionStatus, SyncFile, SyncSession, UploadResult,
};
pub use progress::{Progress, ProgressKind, ProgressSink};
pub use store::{FileStore, SessionStore, Subscription};
pub use upload::Uploader;
