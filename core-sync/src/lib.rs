//! # Sync Pipeline Core
//!
//! Moves local files into cloud storage through a human review step.
//!
//! ## Overview
//!
//! Files are discovered under a root directory, their metadata is extracted
//! and they wait in `Extracted` until a reviewer approves, rejects or later
//! trashes them. Approved files are given a normalized destination path and
//! uploaded; content already stored is recognised and skipped.
//!
//! ## Components
//!
//! - **Pipeline** (`pipeline`): Extraction and approval orchestration
//! - **State Machine** (`state_machine`): Legal file status transitions
//! - **Stats** (`stats`): Batched, concurrent session counters and their flush supervisor
//! - **Discovery** (`discovery`): Filesystem walker producing candidate files
//! - **Extraction** (`extractor`): Chaining of metadata extractors
//! - **Normalization** (`normalize`, `print`): Destination path templates and sanitization

pub mod discovery;
pub mod error;
pub mod extractor;
pub mod normalize;
pub mod pipeline;
pub mod print;
pub mod state_machine;
pub mod stats;

pub use discovery::{hash_file, ExtensionDiscoverer};
pub use error::{Result, SyncError};
pub use extractor::ChainedExtractor;
pub use normalize::{
    sanitize_filename, sanitize_path, validate_gcs_path, CollisionResolver, NormalizedPath,
    PathNormalizer, PathTemplate,
};
pub use pipeline::{
    ApprovalResult, ExtractionHandle, FileError, Pipeline, PipelineBuilder, PipelineResult,
    RetryResult, Stage,
};
pub use print::{detect_kind, PrintKind, PrintPathNormalizer};
pub use stats::{Counter, FlushEscalation, FlushNotice, FlushSupervisor, StatsAccumulator};
