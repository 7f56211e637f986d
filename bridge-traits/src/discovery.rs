//! File discovery contract.

use std::path::Path;

use core_async::sync::{mpsc, CancellationToken};

use crate::{error::BridgeError, model::FileInfo};

/// The two streams produced by a discovery run.
///
/// Both are finite: the discoverer closes them once the walk finishes or is
/// cancelled. Consumers should drain both, otherwise a full error channel can
/// hold the walk back.
#[derive(Debug)]
pub struct DiscoveryStreams {
    pub files: mpsc::Receiver<FileInfo>,
    pub errors: mpsc::Receiver<BridgeError>,
}

/// Walks a local directory tree and streams candidate files.
///
/// `discover` returns immediately; the walk runs in the background and must
/// be started from within a runtime.
///
/// # Example
///
/// ```ignore
/// let DiscoveryStreams { mut files, mut errors } = discoverer.discover(cancel, root);
/// while let Some(file) = files.recv().await {
///     println!("{}", file.path.display());
/// }
/// ```
pub trait Discoverer: Send + Sync {
    fn discover(&self, cancel: CancellationToken, root: &Path) -> DiscoveryStreams;
}
