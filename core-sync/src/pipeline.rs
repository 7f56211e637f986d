//! # Sync Pipeline
//!
//! Orchestrates the two-phase, human-reviewed sync workflow.
//!
//! ## Overview
//!
//! **Extraction** streams discovered files into a bounded pool of concurrent
//! workers. Each worker creates the file record, extracts metadata and parks
//! the file in `Extracted`. Nothing is uploaded in this phase.
//!
//! **Approval** runs later, per explicit request and sequentially: approved
//! files are normalized to a destination path and handed to the uploader,
//! which either stores them (`Uploaded`) or recognises identical content
//! already stored (`Skipped`). Rejection, trashing and retry are separate
//! operations on explicit file sets.
//!
//! Per-file failures never abort a run. They are recorded in the run's result
//! and on the file record, and the run continues with the next file.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .discoverer(Arc::new(ExtensionDiscoverer::new(["epub", "pdf", "cbz"])))
//!     .extractor(extractor)
//!     .normalizer(Arc::new(PrintPathNormalizer::new()))
//!     .uploader(uploader)
//!     .session_store(sessions)
//!     .file_store(files)
//!     .build()?;
//!
//! let result = pipeline.run_extraction(&cancel, Path::new("/books"), "user-1").await?;
//! let ready = files.list_by_session(result.session_id).await?;
//! pipeline.approve_and_upload(&cancel, result.session_id, &ids).await?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{
    error::BridgeError, Discoverer, DiscoveryStreams, ExtractedMetadata, FileId, FileInfo,
    FileMetadata, FileStatus, FileStore, MetadataExtractor, Progress, ProgressSink, SessionId,
    SessionStatus, SessionStore, SyncFile, SyncSession, Uploader,
};
use chrono::Utc;
use core_async::sync::{mpsc, oneshot, CancellationToken, Semaphore};
use core_async::task::{self, JoinError, JoinSet};
use core_async::time::{Duration, Instant};
use core_runtime::config::PipelineConfig;
use core_runtime::logging::{redact_if_sensitive, strip_path};
use tracing::{debug, info, instrument, warn};

use crate::normalize::PathNormalizer;
use crate::state_machine::{self, transition};
use crate::stats::{FlushSupervisor, StatsAccumulator};
use crate::{Result, SyncError};

// ============================================================================
// Results
// ============================================================================

/// Where in the workflow an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Admission,
    Extraction,
    GetFile,
    Approval,
    Reject,
    Trash,
    Retry,
    StatsFlush,
    Session,
    Pipeline,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Admission => "admission",
            Stage::Extraction => "extraction",
            Stage::GetFile => "get_file",
            Stage::Approval => "approval",
            Stage::Reject => "reject",
            Stage::Trash => "trash",
            Stage::Retry => "retry",
            Stage::StatsFlush => "stats_flush",
            Stage::Session => "session",
            Stage::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded failure.
#[derive(Debug)]
pub struct FileError {
    pub file: Option<FileInfo>,
    pub file_id: Option<FileId>,
    pub stage: Stage,
    pub error: SyncError,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, &self.file_id) {
            (Some(file), _) => write!(f, "[{}] {}: {}", self.stage, file.path.display(), self.error),
            (None, Some(id)) => write!(f, "[{}] {}: {}", self.stage, id, self.error),
            (None, None) => write!(f, "[{}] {}", self.stage, self.error),
        }
    }
}

/// Summary of an extraction run.
#[derive(Debug)]
pub struct PipelineResult {
    pub session_id: SessionId,
    pub total_files: usize,
    /// Files that reached `Extracted`
    pub processed_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub errors: Vec<FileError>,
    pub duration: Duration,
}

impl PipelineResult {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            total_files: 0,
            processed_files: 0,
            skipped_files: 0,
            failed_files: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn record(&mut self, file: Option<FileInfo>, stage: Stage, error: SyncError) {
        self.errors.push(FileError {
            file,
            file_id: None,
            stage,
            error,
        });
    }

    /// True when the run stopped early because it was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.stage == Stage::Pipeline && e.error.is_cancelled())
    }
}

/// Summary of an approval call.
#[derive(Debug)]
pub struct ApprovalResult {
    pub session_id: SessionId,
    pub approved: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<FileError>,
}

impl ApprovalResult {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            approved: 0,
            uploaded: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }
}

/// Summary of a retry call.
#[derive(Debug)]
pub struct RetryResult {
    pub session_id: SessionId,
    /// Files that were in `Error` and re-entered the workflow
    pub retried: usize,
    /// Retried files that reached `Extracted`, `Uploaded` or `Skipped`
    pub recovered: usize,
    pub failed: usize,
    pub errors: Vec<FileError>,
}

fn file_error(file_id: FileId, stage: Stage, error: SyncError) -> FileError {
    FileError {
        file: None,
        file_id: Some(file_id),
        stage,
        error,
    }
}

/// Handle to a running extraction.
#[derive(Debug)]
pub struct ExtractionHandle {
    pub session_id: SessionId,
    /// Resolves once the run has finished and the session is finalized
    pub result: oneshot::Receiver<PipelineResult>,
    /// Advisory progress; closes when the run finishes
    pub progress: mpsc::Receiver<Progress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Uploaded,
    Skipped,
}

struct WorkerOutcome {
    file: FileInfo,
    result: Result<()>,
    flush_error: Option<SyncError>,
}

// ============================================================================
// Construction
// ============================================================================

/// Builder that refuses to produce a pipeline with a missing collaborator.
#[derive(Default)]
pub struct PipelineBuilder {
    discoverer: Option<Arc<dyn Discoverer>>,
    extractor: Option<Arc<dyn MetadataExtractor>>,
    normalizer: Option<Arc<dyn PathNormalizer>>,
    uploader: Option<Arc<dyn Uploader>>,
    session_store: Option<Arc<dyn SessionStore>>,
    file_store: Option<Arc<dyn FileStore>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn discoverer(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn PathNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.file_store = Some(store);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// `SyncError::Config` naming the first missing collaborator or invalid setting.
    pub fn build(self) -> Result<Pipeline> {
        Pipeline::new(
            required(self.discoverer, "discoverer")?,
            required(self.extractor, "extractor")?,
            required(self.normalizer, "normalizer")?,
            required(self.uploader, "uploader")?,
            required(self.session_store, "session store")?,
            required(self.file_store, "file store")?,
            self.config,
        )
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
    value.ok_or_else(|| SyncError::Config(format!("{name} is required")))
}

/// The sync orchestrator.
///
/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct Pipeline {
    discoverer: Arc<dyn Discoverer>,
    extractor: Arc<dyn MetadataExtractor>,
    normalizer: Arc<dyn PathNormalizer>,
    uploader: Arc<dyn Uploader>,
    session_store: Arc<dyn SessionStore>,
    file_store: Arc<dyn FileStore>,
    config: PipelineConfig,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        discoverer: Arc<dyn Discoverer>,
        extractor: Arc<dyn MetadataExtractor>,
        normalizer: Arc<dyn PathNormalizer>,
        uploader: Arc<dyn Uploader>,
        session_store: Arc<dyn SessionStore>,
        file_store: Arc<dyn FileStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            discoverer,
            extractor,
            normalizer,
            uploader,
            session_store,
            file_store,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn stats_for(&self, session: SyncSession) -> Arc<StatsAccumulator> {
        Arc::new(StatsAccumulator::new(
            self.session_store.clone(),
            session,
            self.config.stats_batch_interval,
            self.config.stats_batch_size,
        ))
    }

    /// Load a record and check that it belongs to `session_id`.
    async fn load_file(&self, session_id: SessionId, file_id: FileId) -> Result<SyncFile> {
        let record = self.file_store.get(file_id).await?;
        if record.session_id != session_id {
            return Err(SyncError::SessionMismatch {
                file_id,
                session_id: session_id.to_string(),
            });
        }
        Ok(record)
    }

    /// Record `err` on the file and move it to `Error`.
    ///
    /// Returns the error to report, combined with any failure to persist it.
    async fn mark_failed(&self, record: &mut SyncFile, err: SyncError) -> SyncError {
        record.error = Some(err.to_string());
        if let Err(transition_err) = transition(record, FileStatus::Error) {
            return SyncError::Compound {
                primary: Box::new(err),
                secondary: Box::new(transition_err),
            };
        }
        match self.file_store.update(record).await {
            Ok(()) => err,
            Err(store_err) => SyncError::Compound {
                primary: Box::new(err),
                secondary: Box::new(store_err.into()),
            },
        }
    }

    // ========================================================================
    // Extraction Phase
    // ========================================================================

    /// Run extraction to completion and return its summary.
    ///
    /// Progress events are drained and discarded.
    #[instrument(skip(self, cancel), fields(root = %root.display()))]
    pub async fn run_extraction(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        user_id: &str,
    ) -> Result<PipelineResult> {
        let ExtractionHandle {
            result,
            mut progress,
            ..
        } = self.run_extraction_async(cancel, root, user_id).await?;

        let drain = task::spawn(async move { while progress.recv().await.is_some() {} });
        let outcome = result
            .await
            .map_err(|_| SyncError::Internal("extraction ended without a result".to_string()));
        drain.abort();
        outcome
    }

    /// Create the session and start extraction in the background.
    ///
    /// # Errors
    ///
    /// Only session creation failures are returned here; everything after
    /// that is reported through the result channel.
    pub async fn run_extraction_async(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        user_id: &str,
    ) -> Result<ExtractionHandle> {
        let session = SyncSession::start(user_id, root);
        self.session_store.create(&session).await?;
        info!(
            session_id = %session.id,
            user_id = %redact_if_sensitive("user_id", user_id),
            "Extraction session created"
        );

        let (progress, progress_rx) = ProgressSink::channel(self.config.progress_buffer_size);
        let (result_tx, result_rx) = oneshot::channel();
        let session_id = session.id;
        let pipeline = self.clone();
        let cancel = cancel.clone();
        let root = root.to_path_buf();

        task::spawn(async move {
            let result = pipeline.execute(cancel, session, root, progress).await;
            if result_tx.send(result).is_err() {
                debug!(%session_id, "Extraction result dropped, caller went away");
            }
        });

        Ok(ExtractionHandle {
            session_id,
            result: result_rx,
            progress: progress_rx,
        })
    }

    async fn execute(
        self,
        cancel: CancellationToken,
        session: SyncSession,
        root: PathBuf,
        progress: ProgressSink,
    ) -> PipelineResult {
        let started = Instant::now();
        let session_id = session.id;
        let user_id = session.user_id.clone();
        let mut result = PipelineResult::new(session_id);
        let stats = self.stats_for(session);

        let supervisor_cancel = cancel.child_token();
        let supervisor = FlushSupervisor::new(stats.clone(), self.config.stats_batch_interval)
            .with_escalation(
                self.config.stats_failure_reminder_every,
                self.config.stats_max_flush_failures,
            )
            .with_progress(progress.clone())
            .spawn(supervisor_cancel.clone());

        info!(%session_id, "Phase 1: discovery and extraction");
        progress.send(Progress::status(
            "extraction",
            format!("scanning {}", root.display()),
        ));
        let streams = self.discoverer.discover(cancel.clone(), &root);
        self.extract_all(&cancel, session_id, &user_id, streams, &stats, &progress, &mut result)
            .await;

        supervisor_cancel.cancel();
        if let Err(err) = supervisor.await {
            warn!(error = %err, "Stats supervisor ended abnormally");
        }

        info!(%session_id, "Phase 2: finalizing session");
        if let Err(err) = stats.flush().await {
            result.record(None, Stage::StatsFlush, err);
        }

        let status = if result.processed_files > 0 || result.skipped_files > 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        if let Err(err) = stats.finalize(status).await {
            result.record(None, Stage::Session, err);
        }

        result.duration = started.elapsed();
        info!(
            %session_id,
            status = %status,
            total = result.total_files,
            processed = result.processed_files,
            failed = result.failed_files,
            errors = result.errors.len(),
            duration_ms = result.duration.as_millis() as u64,
            "Extraction finished"
        );
        progress.send(Progress::status(
            "extraction",
            format!(
                "{} of {} files extracted",
                result.processed_files, result.total_files
            ),
        ));
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_all(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        user_id: &str,
        streams: DiscoveryStreams,
        stats: &Arc<StatsAccumulator>,
        progress: &ProgressSink,
        result: &mut PipelineResult,
    ) {
        let DiscoveryStreams {
            mut files,
            mut errors,
        } = streams;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_jobs));
        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut files_open = true;
        let mut errors_open = true;
        let mut cancelled = false;

        while files_open || errors_open {
            core_async::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    fold_outcome(joined, result);
                }
                next = files.recv(), if files_open => match next {
                    None => files_open = false,
                    Some(file) => {
                        stats.increment_discovered();
                        result.total_files += 1;

                        let permit = core_async::select! {
                            _ = cancel.cancelled() => Err(SyncError::Cancelled),
                            permit = semaphore.clone().acquire_owned() => {
                                permit.map_err(|e| SyncError::Internal(e.to_string()))
                            }
                        };
                        let permit = match permit {
                            Ok(permit) => permit,
                            Err(err) => {
                                cancelled = err.is_cancelled();
                                result.record(Some(file), Stage::Admission, err);
                                break;
                            }
                        };

                        let worker = self.clone();
                        let cancel = cancel.clone();
                        let user_id = user_id.to_string();
                        let stats = stats.clone();
                        let progress = progress.clone();
                        workers.spawn(async move {
                            let _permit = permit;
                            worker
                                .extract_file_task(cancel, session_id, user_id, file, stats, progress)
                                .await
                        });
                    }
                },
                next = errors.recv(), if errors_open => match next {
                    None => errors_open = false,
                    // Cancellation is recorded once, as a pipeline entry.
                    Some(err) if err.is_cancelled() => {}
                    Some(err) => {
                        warn!(error = %err, "Discovery error");
                        result.record(None, Stage::Discovery, err.into());
                    }
                },
            }
        }

        // Stop the walk before waiting on workers.
        drop(files);
        drop(errors);

        if cancelled {
            info!(in_flight = workers.len(), "Cancellation requested, waiting for in-flight extractions");
        }
        while let Some(joined) = workers.join_next().await {
            fold_outcome(joined, result);
        }
        if cancelled {
            result.record(None, Stage::Pipeline, SyncError::Cancelled);
        }
    }

    async fn extract_file_task(
        self,
        cancel: CancellationToken,
        session_id: SessionId,
        user_id: String,
        file: FileInfo,
        stats: Arc<StatsAccumulator>,
        progress: ProgressSink,
    ) -> WorkerOutcome {
        let result = self
            .extract_file(&cancel, session_id, &user_id, &file, &stats, &progress)
            .await;
        if result.is_err() {
            stats.increment_errors();
        }

        let flush_error = if stats.should_flush() {
            stats.flush().await.err()
        } else {
            None
        };

        WorkerOutcome {
            file,
            result,
            flush_error,
        }
    }

    async fn extract_file(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        user_id: &str,
        file: &FileInfo,
        stats: &StatsAccumulator,
        progress: &ProgressSink,
    ) -> Result<()> {
        let mut record = SyncFile::pending(user_id, session_id, file);
        self.file_store.create(&record).await?;
        self.extraction_step(cancel, &mut record, file, stats, progress)
            .await
    }

    /// Move `record` through `Extracting` to `Extracted` or `Error`.
    async fn extraction_step(
        &self,
        cancel: &CancellationToken,
        record: &mut SyncFile,
        file: &FileInfo,
        stats: &StatsAccumulator,
        progress: &ProgressSink,
    ) -> Result<()> {
        transition(record, FileStatus::Extracting)?;
        self.file_store.update(record).await?;
        progress.send(Progress::operation(
            "extract",
            Some(file.path.clone()),
            0,
            file.size,
        ));

        match self.extractor.extract(cancel, file, progress).await {
            Ok(metadata) => {
                record.metadata = FileMetadata::from(&metadata);
                record.error = None;
                transition(record, FileStatus::Extracted)?;
                self.file_store.update(record).await?;
                stats.increment_extracted();

                debug!(file = %file_name(&file.path), "Extracted");
                progress.send(Progress::operation(
                    "extract",
                    Some(file.path.clone()),
                    file.size,
                    file.size,
                ));
                Ok(())
            }
            Err(source) => {
                let err = SyncError::Extraction {
                    path: file.path.display().to_string(),
                    source,
                };
                warn!(
                    file = %file_name(&file.path),
                    error = %err,
                    "Extraction failed"
                );
                progress.send(Progress::error(
                    "extract",
                    Some(file.path.clone()),
                    err.to_string(),
                ));
                Err(self.mark_failed(record, err).await)
            }
        }
    }

    // ========================================================================
    // Approval Phase
    // ========================================================================

    /// Upload the given files, one after another.
    ///
    /// Per-file failures are counted and recorded; only a missing session is
    /// returned as an error.
    #[instrument(skip(self, cancel, file_ids), fields(session_id = %session_id, files = file_ids.len()))]
    pub async fn approve_and_upload(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        file_ids: &[FileId],
    ) -> Result<ApprovalResult> {
        let session = self.session_store.get(session_id).await?;
        let stats = self.stats_for(session);
        let progress = ProgressSink::disabled();
        let mut result = ApprovalResult::new(session_id);

        for &file_id in file_ids {
            if cancel.is_cancelled() {
                result.errors.push(file_error(file_id, Stage::Approval, SyncError::Cancelled));
                break;
            }

            let record = match self.load_file(session_id, file_id).await {
                Ok(record) => record,
                Err(err) => {
                    result.failed += 1;
                    result.errors.push(file_error(file_id, Stage::GetFile, err));
                    continue;
                }
            };

            match self.approve_file(cancel, record, &stats, &progress).await {
                Ok(outcome) => {
                    result.approved += 1;
                    match outcome {
                        UploadOutcome::Uploaded => result.uploaded += 1,
                        UploadOutcome::Skipped => result.skipped += 1,
                    }
                }
                Err(err) => {
                    warn!(%file_id, error = %err, "Approval failed");
                    result.failed += 1;
                    result.errors.push(file_error(file_id, Stage::Approval, err));
                }
            }
        }

        if let Err(err) = stats.flush().await {
            result.errors.push(FileError {
                file: None,
                file_id: None,
                stage: Stage::StatsFlush,
                error: err,
            });
        }

        info!(
            approved = result.approved,
            uploaded = result.uploaded,
            skipped = result.skipped,
            failed = result.failed,
            "Approval finished"
        );
        Ok(result)
    }

    /// Approve every file of the session that is waiting for review.
    pub async fn approve_all_and_upload(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
    ) -> Result<ApprovalResult> {
        let ready: Vec<FileId> = self
            .file_store
            .list_by_session(session_id)
            .await?
            .into_iter()
            .filter(|file| file.status == FileStatus::Extracted)
            .map(|file| file.id)
            .collect();

        debug!(%session_id, ready = ready.len(), "Approving all extracted files");
        self.approve_and_upload(cancel, session_id, &ready).await
    }

    async fn approve_file(
        &self,
        cancel: &CancellationToken,
        mut record: SyncFile,
        stats: &StatsAccumulator,
        progress: &ProgressSink,
    ) -> Result<UploadOutcome> {
        if !state_machine::can_approve(record.status) {
            return Err(SyncError::InvalidFileState {
                file_id: record.id,
                status: record.status,
                action: "approve",
            });
        }

        let file = record.to_file_info();
        let metadata = record.metadata.to_extracted();

        let normalized = match self.normalizer.normalize(cancel, &file, &metadata).await {
            Ok(normalized) => normalized,
            Err(err) => {
                // Extracted has no edge to Error; the file stays reviewable.
                record.error = Some(err.to_string());
                record.updated_at = Utc::now();
                return match self.file_store.update(&record).await {
                    Ok(()) => Err(err),
                    Err(store_err) => Err(SyncError::Compound {
                        primary: Box::new(err),
                        secondary: Box::new(store_err.into()),
                    }),
                };
            }
        };

        self.upload_step(cancel, &mut record, &file, normalized.path, &metadata, stats, progress)
            .await
    }

    /// Move `record` through `Uploading` to `Uploaded`, `Skipped` or `Error`.
    #[allow(clippy::too_many_arguments)]
    async fn upload_step(
        &self,
        cancel: &CancellationToken,
        record: &mut SyncFile,
        file: &FileInfo,
        dest_path: String,
        metadata: &ExtractedMetadata,
        stats: &StatsAccumulator,
        progress: &ProgressSink,
    ) -> Result<UploadOutcome> {
        transition(record, FileStatus::Uploading)?;
        record.destination_path = Some(dest_path.clone());
        record.error = None;
        self.file_store.update(record).await?;

        let failure = match self
            .uploader
            .upload(cancel, file, &dest_path, metadata, progress)
            .await
        {
            Ok(upload) if upload.success => {
                let (status, outcome) = if upload.deduplicated {
                    (FileStatus::Skipped, UploadOutcome::Skipped)
                } else {
                    (FileStatus::Uploaded, UploadOutcome::Uploaded)
                };
                if !upload.path.is_empty() {
                    record.destination_path = Some(upload.path);
                }
                transition(record, status)?;
                self.file_store.update(record).await?;

                stats.increment_approved();
                match outcome {
                    UploadOutcome::Uploaded => stats.increment_uploaded(),
                    UploadOutcome::Skipped => stats.increment_skipped(),
                }
                debug!(
                    file = %file_name(&file.path),
                    dest = %dest_path,
                    deduplicated = upload.deduplicated,
                    bytes = upload.bytes_uploaded,
                    "Upload complete"
                );
                return Ok(outcome);
            }
            Ok(_) => BridgeError::OperationFailed("uploader reported an unsuccessful upload".to_string()),
            Err(err) => err,
        };

        stats.increment_errors();
        let err = SyncError::Upload {
            path: dest_path,
            source: failure,
        };
        Err(self.mark_failed(record, err).await)
    }

    /// Reject files awaiting review. Stops at the first failure.
    ///
    /// Counts accumulated before a failure are still persisted.
    #[instrument(skip(self, cancel, file_ids), fields(session_id = %session_id, files = file_ids.len()))]
    pub async fn reject_files(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        file_ids: &[FileId],
    ) -> Result<()> {
        let session = self.session_store.get(session_id).await?;
        let stats = self.stats_for(session);

        let outcome = self.reject_each(cancel, session_id, file_ids, &stats).await;
        let flushed = stats.flush().await;
        outcome?;
        flushed
    }

    async fn reject_each(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        file_ids: &[FileId],
        stats: &StatsAccumulator,
    ) -> Result<()> {
        for &file_id in file_ids {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut record = self.load_file(session_id, file_id).await?;
            if !state_machine::can_reject(record.status) {
                return Err(SyncError::InvalidFileState {
                    file_id,
                    status: record.status,
                    action: "reject",
                });
            }
            transition(&mut record, FileStatus::Rejected)?;
            self.file_store.update(&record).await?;
            stats.increment_rejected();
            debug!(%file_id, "Rejected");
        }
        Ok(())
    }

    /// Delete the local copies of synchronized files. Stops at the first failure.
    #[instrument(skip(self, cancel, file_ids), fields(session_id = %session_id, files = file_ids.len()))]
    pub async fn trash_files(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        file_ids: &[FileId],
    ) -> Result<()> {
        for &file_id in file_ids {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut record = self.load_file(session_id, file_id).await?;
            if !state_machine::can_trash(record.status) {
                return Err(SyncError::InvalidFileState {
                    file_id,
                    status: record.status,
                    action: "trash",
                });
            }

            if !record.local_path.as_os_str().is_empty() {
                self.uploader
                    .delete_local(cancel, &record.local_path)
                    .await?;
            }
            transition(&mut record, FileStatus::Trashed)?;
            self.file_store.update(&record).await?;
            debug!(%file_id, file = %file_name(&record.local_path), "Trashed local copy");
        }
        Ok(())
    }

    /// Re-run failed files from the stage they failed in.
    ///
    /// A file with a destination path failed during upload and is uploaded
    /// again to that path; otherwise extraction is repeated.
    #[instrument(skip(self, cancel, file_ids), fields(session_id = %session_id, files = file_ids.len()))]
    pub async fn retry_files(
        &self,
        cancel: &CancellationToken,
        session_id: SessionId,
        file_ids: &[FileId],
    ) -> Result<RetryResult> {
        let session = self.session_store.get(session_id).await?;
        let stats = self.stats_for(session);
        let progress = ProgressSink::disabled();
        let mut result = RetryResult {
            session_id,
            retried: 0,
            recovered: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for &file_id in file_ids {
            if cancel.is_cancelled() {
                result.errors.push(file_error(file_id, Stage::Retry, SyncError::Cancelled));
                break;
            }

            let mut record = match self.load_file(session_id, file_id).await {
                Ok(record) => record,
                Err(err) => {
                    result.failed += 1;
                    result.errors.push(file_error(file_id, Stage::GetFile, err));
                    continue;
                }
            };
            if !state_machine::can_retry(record.status) {
                result.failed += 1;
                result.errors.push(file_error(
                    file_id,
                    Stage::Retry,
                    SyncError::InvalidFileState {
                        file_id,
                        status: record.status,
                        action: "retry",
                    },
                ));
                continue;
            }

            result.retried += 1;
            let file = record.to_file_info();
            let outcome = match record.destination_path.clone() {
                Some(dest_path) => {
                    let metadata = record.metadata.to_extracted();
                    self.upload_step(cancel, &mut record, &file, dest_path, &metadata, &stats, &progress)
                        .await
                        .map(|_| ())
                }
                None => {
                    let outcome = self
                        .extraction_step(cancel, &mut record, &file, &stats, &progress)
                        .await;
                    if outcome.is_err() {
                        stats.increment_errors();
                    }
                    outcome
                }
            };

            match outcome {
                Ok(()) => result.recovered += 1,
                Err(err) => {
                    result.failed += 1;
                    result.errors.push(file_error(file_id, Stage::Retry, err));
                }
            }
        }

        if let Err(err) = stats.flush().await {
            result.errors.push(FileError {
                file: None,
                file_id: None,
                stage: Stage::StatsFlush,
                error: err,
            });
        }
        info!(retried = result.retried, recovered = result.recovered, failed = result.failed, "Retry finished");
        Ok(result)
    }
}

/// File name only, so logs never carry full local paths.
fn file_name(path: &Path) -> String {
    strip_path(&path.to_string_lossy()).to_string()
}

fn fold_outcome(joined: std::result::Result<WorkerOutcome, JoinError>, result: &mut PipelineResult) {
    match joined {
        Ok(outcome) => {
            match outcome.result {
                Ok(()) => result.processed_files += 1,
                Err(err) => {
                    result.failed_files += 1;
                    result.record(Some(outcome.file), Stage::Extraction, err);
                }
            }
            if let Some(err) = outcome.flush_error {
                result.record(None, Stage::StatsFlush, err);
            }
        }
        Err(join_err) => {
            result.failed_files += 1;
            result.record(
                None,
                Stage::Extraction,
                SyncError::Internal(format!("extraction task failed: {join_err}")),
            );
        }
    }
}
