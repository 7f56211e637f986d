//! # Extension Discoverer
//!
//! Reference [`Discoverer`] that walks a local tree and keeps files whose
//! extension is on an allow-list.
//!
//! ## Overview
//!
//! The walk runs on a blocking thread (directory iteration and hashing are
//! synchronous I/O) and feeds two bounded channels. Each send races against
//! the cancellation token, so a cancelled walk never blocks on a full channel
//! and stops promptly. Per-entry failures (unreadable directories, files that
//! vanish mid-walk) are reported on the error channel and the walk continues.
//!
//! ## Usage
//!
//! ```ignore
//! let discoverer = ExtensionDiscoverer::new(["epub", ".PDF", "cbz"]).with_skip_hidden(true);
//! let DiscoveryStreams { mut files, mut errors } = discoverer.discover(cancel, root);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{error::BridgeError, Discoverer, DiscoveryStreams, FileInfo};
use chrono::{DateTime, Utc};
use core_async::runtime::{self, Handle};
use core_async::sync::{mpsc, CancellationToken};
use core_async::task;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const DEFAULT_DISCOVERY_BUFFER: usize = 100;

type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ExtensionDiscoverer {
    /// Lowercase, dot-prefixed
    extensions: Vec<String>,
    skip_hidden: bool,
    compute_hash: bool,
    buffer_size: usize,
    filter: Option<FileFilter>,
}

impl fmt::Debug for ExtensionDiscoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDiscoverer")
            .field("extensions", &self.extensions)
            .field("skip_hidden", &self.skip_hidden)
            .field("compute_hash", &self.compute_hash)
            .field("buffer_size", &self.buffer_size)
            .field("filter", &self.filter.as_ref().map(|_| "Fn(&Path) -> bool"))
            .finish()
    }
}

impl ExtensionDiscoverer {
    /// Extensions may be given with or without the leading dot, in any case.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
            skip_hidden: true,
            compute_hash: true,
            buffer_size: DEFAULT_DISCOVERY_BUFFER,
            filter: None,
        }
    }

    /// Skip dot-prefixed entries; hidden directories are pruned entirely.
    pub fn with_skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    pub fn with_compute_hash(mut self, compute: bool) -> Self {
        self.compute_hash = compute;
        self
    }

    /// Capacity of each output channel. Zero is raised to one.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Additional predicate a matching file must satisfy.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        let ext = format!(".{}", ext.to_lowercase());
        if !self.extensions.iter().any(|allowed| *allowed == ext) {
            return false;
        }
        self.filter.as_ref().map_or(true, |filter| filter(path))
    }

    fn describe(&self, root: &Path, entry: &DirEntry) -> Result<FileInfo, BridgeError> {
        let path = entry.path();
        let metadata = entry.metadata().map_err(|e| walk_error(path, e))?;
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        let hash = if self.compute_hash {
            hash_file(path).map_err(|e| BridgeError::Discovery {
                path: path.to_path_buf(),
                message: format!("hashing failed: {e}"),
            })?
        } else {
            String::new()
        };

        Ok(FileInfo {
            path: path.to_path_buf(),
            relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
            size: metadata.len(),
            modified_at,
            hash,
            mime_type: mime_guess::from_path(path).first_or_octet_stream().to_string(),
        })
    }

    fn walk(
        &self,
        handle: &Handle,
        cancel: &CancellationToken,
        root: &Path,
        files: &mpsc::Sender<FileInfo>,
        errors: &mpsc::Sender<BridgeError>,
    ) {
        let skip_hidden = self.skip_hidden;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| !(skip_hidden && entry.depth() > 0 && is_hidden(entry)));

        let mut found = 0usize;
        for entry in walker {
            if cancel.is_cancelled() {
                debug!(found, "Discovery cancelled");
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    let message = err.to_string();
                    warn!(path = %path.display(), error = %message, "Discovery entry failed");
                    if !send(handle, cancel, errors, BridgeError::Discovery { path, message }) {
                        return;
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let delivered = match self.describe(root, &entry) {
                Ok(info) => {
                    found += 1;
                    send(handle, cancel, files, info)
                }
                Err(err) => send(handle, cancel, errors, err),
            };
            if !delivered {
                return;
            }
        }
        debug!(found, root = %root.display(), "Discovery finished");
    }
}

impl Discoverer for ExtensionDiscoverer {
    fn discover(&self, cancel: CancellationToken, root: &Path) -> DiscoveryStreams {
        let capacity = self.buffer_size.max(1);
        let (files_tx, files_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);

        let Some(handle) = runtime::try_current() else {
            let _ = errors_tx.try_send(BridgeError::NotAvailable(
                "discovery requires a running async runtime".to_string(),
            ));
            return DiscoveryStreams {
                files: files_rx,
                errors: errors_rx,
            };
        };

        let discoverer = self.clone();
        let root: PathBuf = root.to_path_buf();
        task::spawn_blocking(move || {
            discoverer.walk(&handle, &cancel, &root, &files_tx, &errors_tx);
            // Channels close when the senders drop here.
        });

        DiscoveryStreams {
            files: files_rx,
            errors: errors_rx,
        }
    }
}

/// Deliver `value` unless cancelled first; false means stop walking.
fn send<T: Send>(handle: &Handle, cancel: &CancellationToken, tx: &mpsc::Sender<T>, value: T) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    handle.block_on(async {
        core_async::select! {
            _ = cancel.cancelled() => false,
            sent = tx.send(value) => sent.is_ok(),
        }
    })
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn walk_error(path: &Path, err: walkdir::Error) -> BridgeError {
    BridgeError::Discovery {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Streaming SHA-256 of a file, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("fiction/tolkien")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("fiction/tolkien/hobbit.epub"), b"hobbit").unwrap();
        fs::write(root.join("fiction/notes.PDF"), b"notes").unwrap();
        fs::write(root.join("fiction/cover.jpg"), b"jpg").unwrap();
        fs::write(root.join(".cache/stale.epub"), b"stale").unwrap();
        fs::write(root.join(".hidden.pdf"), b"hidden").unwrap();
        dir
    }

    async fn collect(streams: DiscoveryStreams) -> (Vec<FileInfo>, Vec<BridgeError>) {
        let DiscoveryStreams { mut files, mut errors } = streams;
        let mut found = Vec::new();
        while let Some(file) = files.recv().await {
            found.push(file);
        }
        let mut failed = Vec::new();
        while let Some(err) = errors.recv().await {
            failed.push(err);
        }
        found.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        (found, failed)
    }

    #[test]
    fn test_extension_normalization() {
        let discoverer = ExtensionDiscoverer::new(["PDF", ".Epub", " cbz "]);
        assert_eq!(discoverer.extensions(), &[".pdf", ".epub", ".cbz"]);
    }

    #[tokio::test]
    async fn test_discovers_matching_files() {
        let dir = tree();
        let discoverer = ExtensionDiscoverer::new(["epub", "pdf"]);
        let (found, errors) = collect(discoverer.discover(CancellationToken::new(), dir.path())).await;

        assert!(errors.is_empty());
        let relative: Vec<_> = found.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("fiction/notes.PDF"),
                PathBuf::from("fiction/tolkien/hobbit.epub"),
            ]
        );

        let hobbit = &found[1];
        assert_eq!(hobbit.size, 6);
        assert_eq!(hobbit.mime_type, "application/epub+zip");
        assert_eq!(hobbit.hash, format!("{:x}", Sha256::digest(b"hobbit")));
        assert!(hobbit.path.is_absolute());
    }

    #[tokio::test]
    async fn test_hidden_entries_included_when_requested() {
        let dir = tree();
        let discoverer = ExtensionDiscoverer::new(["epub", "pdf"]).with_skip_hidden(false);
        let (found, _) = collect(discoverer.discover(CancellationToken::new(), dir.path())).await;
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn test_hash_disabled_and_filter() {
        let dir = tree();
        let discoverer = ExtensionDiscoverer::new(["epub", "pdf"])
            .with_compute_hash(false)
            .with_filter(|path| !path.to_string_lossy().contains("tolkien"));
        let (found, _) = collect(discoverer.discover(CancellationToken::new(), dir.path())).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path, PathBuf::from("fiction/notes.PDF"));
        assert!(found[0].hash.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let discoverer = ExtensionDiscoverer::new(["pdf"]);
        let (found, errors) = collect(discoverer.discover(CancellationToken::new(), &missing)).await;

        assert!(found.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], BridgeError::Discovery { path, .. } if *path == missing));
    }

    #[tokio::test]
    async fn test_cancelled_walk_closes_streams() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            fs::write(dir.path().join(format!("{i}.pdf")), b"x").unwrap();
        }

        let cancel = CancellationToken::new();
        let discoverer = ExtensionDiscoverer::new(["pdf"]).with_buffer_size(1);
        let DiscoveryStreams { mut files, mut errors } = discoverer.discover(cancel.clone(), dir.path());

        assert!(files.recv().await.is_some());
        cancel.cancel();

        let mut remaining = 0;
        while files.recv().await.is_some() {
            remaining += 1;
        }
        assert!(remaining < 49);

        // stopping is signalled by closing the streams, not by an error
        let mut reported = Vec::new();
        while let Some(err) = errors.recv().await {
            reported.push(err);
        }
        assert!(reported.iter().all(|err| !err.is_cancelled()));
    }

    #[test]
    fn test_hash_file_streams_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        fs::write(&path, vec![7u8; 256 * 1024]).unwrap();
        let expected = format!("{:x}", Sha256::digest(vec![7u8; 256 * 1024]));
        assert_eq!(hash_file(&path).unwrap(), expected);
    }
}
