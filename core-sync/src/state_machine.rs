//! # File Status State Machine
//!
//! Governs how a [`SyncFile`] moves through the review workflow.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Extracting → Extracted → Uploading → Uploaded ─┐
//!               │            │           │   └──→ Skipped ─┴→ Trashed
//!               ↓            ↓           ↓
//!             Error       Rejected     Error
//!
//! Error → Pending | Extracting | Uploading   (retry)
//! ```
//!
//! Trashed and Rejected are terminal. Stores persist whatever they are given,
//! so every status change in the core goes through [`transition`], which
//! validates before mutating.

use bridge_traits::{FileStatus, SyncFile};
use chrono::Utc;

use crate::{Result, SyncError};

/// Every legal `(from, to)` pair.
pub const TRANSITIONS: &[(FileStatus, FileStatus)] = &[
    (FileStatus::Pending, FileStatus::Extracting),
    (FileStatus::Extracting, FileStatus::Extracted),
    (FileStatus::Extracting, FileStatus::Error),
    (FileStatus::Extracted, FileStatus::Uploading),
    (FileStatus::Extracted, FileStatus::Rejected),
    (FileStatus::Uploading, FileStatus::Uploaded),
    (FileStatus::Uploading, FileStatus::Skipped),
    (FileStatus::Uploading, FileStatus::Error),
    (FileStatus::Uploaded, FileStatus::Trashed),
    (FileStatus::Skipped, FileStatus::Trashed),
    (FileStatus::Error, FileStatus::Pending),
    (FileStatus::Error, FileStatus::Extracting),
    (FileStatus::Error, FileStatus::Uploading),
];

/// Whether `from → to` is a legal move.
pub fn can_transition_to(from: FileStatus, to: FileStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Validate a move, naming both states on failure.
pub fn validate_transition(from: FileStatus, to: FileStatus) -> Result<()> {
    if can_transition_to(from, to) {
        Ok(())
    } else {
        Err(SyncError::InvalidStateTransition { from, to })
    }
}

pub fn can_approve(status: FileStatus) -> bool {
    status == FileStatus::Extracted
}

pub fn can_reject(status: FileStatus) -> bool {
    status == FileStatus::Extracted
}

pub fn can_trash(status: FileStatus) -> bool {
    matches!(status, FileStatus::Uploaded | FileStatus::Skipped)
}

pub fn can_retry(status: FileStatus) -> bool {
    status == FileStatus::Error
}

pub fn is_terminal(status: FileStatus) -> bool {
    matches!(status, FileStatus::Trashed | FileStatus::Rejected)
}

/// Move `file` to `to`, refreshing `updated_at`.
///
/// The record is left untouched when the move is illegal.
pub fn transition(file: &mut SyncFile, to: FileStatus) -> Result<()> {
    validate_transition(file.status, to)?;
    file.status = to;
    file.updated_at = Utc::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{FileInfo, SessionId};

    fn record(status: FileStatus) -> SyncFile {
        let mut file = SyncFile::pending("user", SessionId::new(), &FileInfo::default());
        file.status = status;
        file
    }

    #[test]
    fn test_table_edges_validate() {
        for &(from, to) in TRANSITIONS {
            assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn test_every_other_pair_fails_naming_both_states() {
        for from in FileStatus::ALL {
            for to in FileStatus::ALL {
                if TRANSITIONS.contains(&(from, to)) {
                    continue;
                }
                let err = validate_transition(from, to).unwrap_err();
                let message = err.to_string();
                assert!(message.contains(from.as_str()), "{message}");
                assert!(message.contains(to.as_str()), "{message}");
            }
        }
    }

    #[test]
    fn test_self_transitions_are_illegal() {
        for status in FileStatus::ALL {
            assert!(!can_transition_to(status, status));
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in FileStatus::ALL.into_iter().filter(|s| is_terminal(*s)) {
            assert!(TRANSITIONS.iter().all(|(from, _)| *from != status));
        }
        assert!(is_terminal(FileStatus::Trashed));
        assert!(is_terminal(FileStatus::Rejected));
        assert!(!is_terminal(FileStatus::Error));
    }

    #[test]
    fn test_predicates() {
        for status in FileStatus::ALL {
            assert_eq!(can_approve(status), status == FileStatus::Extracted);
            assert_eq!(can_reject(status), status == FileStatus::Extracted);
            assert_eq!(can_retry(status), status == FileStatus::Error);
            assert_eq!(
                can_trash(status),
                matches!(status, FileStatus::Uploaded | FileStatus::Skipped)
            );
        }
    }

    #[test]
    fn test_transition_mutates_on_success() {
        let mut file = record(FileStatus::Pending);
        let before = file.updated_at;
        transition(&mut file, FileStatus::Extracting).unwrap();
        assert_eq!(file.status, FileStatus::Extracting);
        assert!(file.updated_at >= before);
    }

    #[test]
    fn test_transition_leaves_record_on_failure() {
        let mut file = record(FileStatus::Uploaded);
        let snapshot = file.clone();
        let err = transition(&mut file, FileStatus::Extracted).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidStateTransition {
                from: FileStatus::Uploaded,
                to: FileStatus::Extracted
            }
        ));
        assert_eq!(file, snapshot);
    }
}
