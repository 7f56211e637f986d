//! Workspace facade crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `filesync-workspace` alone. The `pipeline` feature (on by default) pulls in
//! the sync orchestration core; without it only the contracts, runtime
//! configuration and async primitives are exposed.

pub use bridge_traits;
pub use core_async;
pub use core_runtime;
#[cfg(feature = "pipeline")]
pub use core_sync;

#[cfg(feature = "pipeline")]
pub use core_sync::{Pipeline, PipelineBuilder, PipelineResult, SyncError};
pub use core_runtime::PipelineConfig;
