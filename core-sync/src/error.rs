use bridge_traits::{error::BridgeError, FileId, FileStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: FileStatus, to: FileStatus },

    #[error("Cannot {action} file {file_id} in status {status}")]
    InvalidFileState {
        file_id: FileId,
        status: FileStatus,
        action: &'static str,
    },

    #[error("File {file_id} does not belong to session {session_id}")]
    SessionMismatch { file_id: FileId, session_id: String },

    #[error("Missing value for placeholder {{{0}}}")]
    MissingPlaceholder(String),

    #[error("Invalid destination path: {0}")]
    InvalidDestinationPath(String),

    #[error("No free path for {base} after {attempts} attempts")]
    MaxCollisionAttempts { base: String, attempts: u32 },

    #[error("Extraction failed for {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: BridgeError,
    },

    #[error("Upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: BridgeError,
    },

    #[error("{primary}; additionally failed to record the error: {secondary}")]
    Compound {
        primary: Box<SyncError>,
        secondary: Box<SyncError>,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// True for cooperative cancellation, whether raised by the core or a collaborator.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::Bridge(err) => err.is_cancelled(),
            SyncError::Extraction { source, .. } | SyncError::Upload { source, .. } => {
                source.is_cancelled()
            }
            SyncError::Compound { primary, .. } => primary.is_cancelled(),
            _ => false,
        }
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
