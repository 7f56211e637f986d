//! Progress reporting.
//!
//! Progress events are advisory. They travel over a bounded channel supplied
//! by the caller and are dropped rather than delayed when the receiver falls
//! behind, so a slow consumer can never stall extraction or upload.

use std::path::PathBuf;

use core_async::sync::mpsc::{self, error::TrySendError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// Byte-level or step-level progress of a running operation
    Operation,
    /// Informational status change
    Status,
    /// Something failed
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub kind: ProgressKind,
    pub operation: String,
    pub file: Option<PathBuf>,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    pub fn operation(
        operation: impl Into<String>,
        file: Option<PathBuf>,
        bytes_processed: u64,
        total_bytes: u64,
    ) -> Self {
        let percentage = if total_bytes == 0 {
            0.0
        } else {
            bytes_processed as f64 / total_bytes as f64 * 100.0
        };
        Self {
            kind: ProgressKind::Operation,
            operation: operation.into(),
            file,
            bytes_processed,
            total_bytes,
            percentage,
            message: String::new(),
        }
    }

    pub fn status(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Status,
            operation: operation.into(),
            file: None,
            bytes_processed: 0,
            total_bytes: 0,
            percentage: 0.0,
            message: message.into(),
        }
    }

    pub fn error(
        operation: impl Into<String>,
        file: Option<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: ProgressKind::Error,
            operation: operation.into(),
            file,
            bytes_processed: 0,
            total_bytes: 0,
            percentage: 0.0,
            message: message.into(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Non-blocking sender for progress events.
///
/// A disabled sink silently discards everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<Progress>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<Progress>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a sink together with the receiving half of a bounded channel.
    ///
    /// A zero capacity is raised to one, the smallest buffer the runtime supports.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Progress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Try to deliver an event; drops it when the channel is full or closed.
    pub fn send(&self, progress: Progress) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };

        match tx.try_send(progress) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(
                    operation = %dropped.operation,
                    kind = ?dropped.kind,
                    "Progress channel full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = Progress::operation("upload", None, 25, 100);
        assert_eq!(progress.kind, ProgressKind::Operation);
        assert!((progress.percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(Progress::operation("upload", None, 5, 0).percentage, 0.0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ProgressSink::channel(1);
        sink.send(Progress::status("extract", "first"));
        sink.send(Progress::status("extract", "second"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_is_ignored() {
        let (sink, rx) = ProgressSink::channel(4);
        drop(rx);
        assert!(!sink.is_enabled());
        sink.send(Progress::error("upload", None, "boom"));
    }

    #[test]
    fn test_disabled_sink() {
        let sink = ProgressSink::disabled();
        assert!(!sink.is_enabled());
        sink.send(Progress::status("noop", "nothing listens"));
    }

    #[tokio::test]
    async fn test_zero_capacity_still_buffers_one() {
        let (sink, mut rx) = ProgressSink::channel(0);
        sink.send(Progress::status("extract", "only"));
        assert_eq!(rx.recv().await.unwrap().message, "only");
    }
}
