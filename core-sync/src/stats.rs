//! # Session Stats Accumulator
//!
//! Batched, failure-tolerant persistence of per-session counters.
//!
//! ## Overview
//!
//! Workers bump lock-free atomic counters on every event. Writing those
//! counters to the [`SessionStore`] is batched: [`StatsAccumulator::should_flush`]
//! turns true once the batch interval has elapsed or enough increments have
//! piled up since the last successful write.
//!
//! A failed flush never loses counts. The counters are cumulative and only
//! the bookkeeping of "what has been persisted" is advanced on success, so
//! the next flush simply writes the newer totals.
//!
//! [`FlushSupervisor`] runs alongside a pipeline on its own timer, retries
//! failing flushes and escalates through progress notices:
//!
//! ```text
//! failure 1            → FirstFailure
//! every Nth failure    → Reminder
//! failure == ceiling   → GaveUp (silent afterwards, retries continue)
//! next success         → Recovered
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::{
    Progress, ProgressSink, SessionStats, SessionStatus, SessionStore, SyncSession,
};
use chrono::Utc;
use core_async::sync::{CancellationToken, Mutex};
use core_async::task::{self, JoinHandle};
use core_async::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{Result, SyncError};

/// Counters tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Discovered,
    Extracted,
    Approved,
    Rejected,
    Uploaded,
    Skipped,
    Errors,
}

#[derive(Debug, Default)]
struct Counters {
    discovered: AtomicU64,
    extracted: AtomicU64,
    approved: AtomicU64,
    rejected: AtomicU64,
    uploaded: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn seeded(stats: &SessionStats) -> Self {
        Self {
            discovered: AtomicU64::new(stats.discovered),
            extracted: AtomicU64::new(stats.extracted),
            approved: AtomicU64::new(stats.approved),
            rejected: AtomicU64::new(stats.rejected),
            uploaded: AtomicU64::new(stats.uploaded),
            skipped: AtomicU64::new(stats.skipped),
            errors: AtomicU64::new(stats.errors),
        }
    }

    fn get(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Discovered => &self.discovered,
            Counter::Extracted => &self.extracted,
            Counter::Approved => &self.approved,
            Counter::Rejected => &self.rejected,
            Counter::Uploaded => &self.uploaded,
            Counter::Skipped => &self.skipped,
            Counter::Errors => &self.errors,
        }
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            discovered: self.discovered.load(Ordering::Acquire),
            extracted: self.extracted.load(Ordering::Acquire),
            approved: self.approved.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            uploaded: self.uploaded.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
        }
    }
}

/// Concurrent counter set bound to one session.
pub struct StatsAccumulator {
    session_store: Arc<dyn SessionStore>,
    /// Serializes snapshot-and-write so flushes never interleave.
    session: Mutex<SyncSession>,
    counters: Counters,
    /// Increments not yet covered by a successful flush.
    pending_ops: AtomicU64,
    consecutive_failures: AtomicU32,
    epoch: Instant,
    last_flush_nanos: AtomicU64,
    batch_interval: Duration,
    batch_size: u64,
}

impl fmt::Debug for StatsAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsAccumulator")
            .field("counters", &self.counters.snapshot())
            .field("pending_ops", &self.pending_ops())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("batch_interval", &self.batch_interval)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl StatsAccumulator {
    /// Bind an accumulator to `session`, starting from its persisted counts.
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        session: SyncSession,
        batch_interval: Duration,
        batch_size: u64,
    ) -> Self {
        Self {
            session_store,
            counters: Counters::seeded(&session.stats),
            session: Mutex::new(session),
            pending_ops: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            epoch: Instant::now(),
            last_flush_nanos: AtomicU64::new(0),
            batch_interval,
            batch_size,
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.counters.get(counter).fetch_add(1, Ordering::AcqRel);
        self.pending_ops.fetch_add(1, Ordering::AcqRel);
    }

    pub fn increment_discovered(&self) {
        self.increment(Counter::Discovered);
    }

    pub fn increment_extracted(&self) {
        self.increment(Counter::Extracted);
    }

    pub fn increment_approved(&self) {
        self.increment(Counter::Approved);
    }

    pub fn increment_rejected(&self) {
        self.increment(Counter::Rejected);
    }

    pub fn increment_uploaded(&self) {
        self.increment(Counter::Uploaded);
    }

    pub fn increment_skipped(&self) {
        self.increment(Counter::Skipped);
    }

    pub fn increment_errors(&self) {
        self.increment(Counter::Errors);
    }

    /// Current totals, including anything not yet persisted.
    pub fn snapshot(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub fn pending_ops(&self) -> u64 {
        self.pending_ops.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn since_last_flush(&self) -> Duration {
        let last = Duration::from_nanos(self.last_flush_nanos.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// True once the batch interval has elapsed or the batch size is reached.
    pub fn should_flush(&self) -> bool {
        self.since_last_flush() >= self.batch_interval || self.pending_ops() >= self.batch_size
    }

    /// Persist the current totals.
    ///
    /// # Errors
    ///
    /// Returns the store error. Counters are kept and the failure streak grows.
    pub async fn flush(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let covered = self.pending_ops();
        session.stats = self.counters.snapshot();

        let result = self.session_store.update(&session).await;
        self.record_write(covered, result)
    }

    /// Set the final status, completion time and totals, then persist.
    pub async fn finalize(&self, status: SessionStatus) -> Result<SyncSession> {
        let mut session = self.session.lock().await;
        let covered = self.pending_ops();
        session.stats = self.counters.snapshot();
        session.status = status;
        session.completed_at = Some(Utc::now());

        let result = self.session_store.update(&session).await;
        self.record_write(covered, result)?;
        Ok(session.clone())
    }

    fn record_write(
        &self,
        covered: u64,
        result: bridge_traits::error::Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                self.pending_ops.fetch_sub(covered, Ordering::AcqRel);
                let now = self.epoch.elapsed().as_nanos();
                self.last_flush_nanos
                    .store(u64::try_from(now).unwrap_or(u64::MAX), Ordering::Release);
                self.consecutive_failures.store(0, Ordering::Release);
                debug!(flushed_ops = covered, "Session stats persisted");
                Ok(())
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    error = %err,
                    consecutive_failures = failures,
                    pending_ops = self.pending_ops(),
                    "Failed to persist session stats"
                );
                Err(SyncError::from(err))
            }
        }
    }
}

// ============================================================================
// Flush Supervisor
// ============================================================================

/// Escalation step for a streak of failed flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushNotice {
    FirstFailure,
    Reminder,
    GaveUp,
    Recovered,
}

/// Escalation state for one streak of failed flushes.
///
/// Any flush can extend the shared streak, so the supervisor may observe
/// counts that skip values. Thresholds fire once when reached or passed,
/// never on an exact count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushEscalation {
    reminder_every: u32,
    max_failures: u32,
    first_sent: bool,
    last_reminder: u32,
    gave_up: bool,
}

impl FlushEscalation {
    pub fn new(reminder_every: u32, max_failures: u32) -> Self {
        Self {
            reminder_every,
            max_failures,
            first_sent: false,
            last_reminder: 0,
            gave_up: false,
        }
    }

    /// The notice, if any, owed for a streak of `failures`.
    pub fn on_failure(&mut self, failures: u32) -> Option<FlushNotice> {
        if failures == 0 || self.gave_up {
            return None;
        }
        let reached_multiple = match self.reminder_every {
            0 => 0,
            every => failures / every * every,
        };

        if failures >= self.max_failures {
            self.gave_up = true;
            self.first_sent = true;
            return Some(FlushNotice::GaveUp);
        }
        if !self.first_sent {
            self.first_sent = true;
            self.last_reminder = reached_multiple;
            return Some(FlushNotice::FirstFailure);
        }
        if reached_multiple > self.last_reminder {
            self.last_reminder = reached_multiple;
            return Some(FlushNotice::Reminder);
        }
        None
    }

    /// End the streak. True when a failure had been announced.
    pub fn on_success(&mut self) -> bool {
        let announced = self.first_sent;
        *self = Self::new(self.reminder_every, self.max_failures);
        announced
    }
}

/// Periodic flusher with escalating failure notices.
pub struct FlushSupervisor {
    stats: Arc<StatsAccumulator>,
    interval: Duration,
    reminder_every: u32,
    max_failures: u32,
    progress: ProgressSink,
}

impl FlushSupervisor {
    pub fn new(stats: Arc<StatsAccumulator>, interval: Duration) -> Self {
        Self {
            stats,
            interval,
            reminder_every: 5,
            max_failures: 20,
            progress: ProgressSink::disabled(),
        }
    }

    pub fn with_escalation(mut self, reminder_every: u32, max_failures: u32) -> Self {
        self.reminder_every = reminder_every;
        self.max_failures = max_failures;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Run until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        task::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut escalation = FlushEscalation::new(self.reminder_every, self.max_failures);
        loop {
            core_async::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Failures of flushes triggered elsewhere are announced here too.
            let failures = self.stats.consecutive_failures();
            if let Some(notice) = escalation.on_failure(failures) {
                self.notify(notice, failures, None);
            }

            // Idle ticks only write when a previous attempt failed.
            if self.stats.pending_ops() == 0 && failures == 0 {
                if escalation.on_success() {
                    self.notify(FlushNotice::Recovered, 0, None);
                }
                continue;
            }

            match self.stats.flush().await {
                Ok(()) => {
                    if escalation.on_success() {
                        self.notify(FlushNotice::Recovered, 0, None);
                    }
                }
                Err(err) => {
                    let failures = self.stats.consecutive_failures();
                    if let Some(notice) = escalation.on_failure(failures) {
                        self.notify(notice, failures, Some(&err));
                    }
                }
            }
        }
        debug!("Stats flush supervisor stopped");
    }

    fn notify(&self, notice: FlushNotice, failures: u32, err: Option<&SyncError>) {
        const OPERATION: &str = "stats_flush";
        let detail = err
            .map(ToString::to_string)
            .unwrap_or_else(|| "store update failed".to_string());

        let progress = match notice {
            FlushNotice::FirstFailure => {
                warn!(error = %detail, "Session stats could not be saved, will retry");
                Progress::error(OPERATION, None, format!("stats flush failing: {detail}"))
            }
            FlushNotice::Reminder => {
                warn!(failures, error = %detail, "Session stats still not saved");
                Progress::error(
                    OPERATION,
                    None,
                    format!("stats flush still failing after {failures} attempts: {detail}"),
                )
            }
            FlushNotice::GaveUp => {
                error!(failures, error = %detail, "Session stats persistence keeps failing");
                Progress::error(
                    OPERATION,
                    None,
                    format!(
                        "stats flush failed {failures} times in a row; no further notices, retries continue: {detail}"
                    ),
                )
            }
            FlushNotice::Recovered => {
                info!("Session stats persistence recovered");
                Progress::status(OPERATION, "stats flush recovered")
            }
        };
        self.progress.send(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::{ProgressKind, SessionId, Subscription};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSessionStore {
        updates: StdMutex<Vec<SyncSession>>,
        failures_left: AtomicU32,
    }

    impl RecordingSessionStore {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn last(&self) -> Option<SyncSession> {
            self.updates.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl SessionStore for RecordingSessionStore {
        async fn create(&self, _session: &SyncSession) -> BridgeResult<()> {
            Ok(())
        }

        async fn update(&self, session: &SyncSession) -> BridgeResult<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BridgeError::OperationFailed("store offline".into()));
            }
            self.updates.lock().unwrap().push(session.clone());
            Ok(())
        }

        async fn get(&self, id: SessionId) -> BridgeResult<SyncSession> {
            Err(BridgeError::NotFound(id.to_string()))
        }

        async fn list(&self, _user_id: &str) -> BridgeResult<Vec<SyncSession>> {
            Ok(Vec::new())
        }

        async fn subscribe(&self, id: SessionId) -> BridgeResult<Subscription<SyncSession>> {
            Err(BridgeError::NotAvailable(format!("subscribe {id}")))
        }

        async fn delete(&self, _id: SessionId) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn accumulator(store: Arc<RecordingSessionStore>, interval: Duration, batch: u64) -> StatsAccumulator {
        StatsAccumulator::new(store, SyncSession::start("user", "/books"), interval, batch)
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_exact() {
        let store = Arc::new(RecordingSessionStore::default());
        let stats = Arc::new(accumulator(store.clone(), Duration::from_secs(60), 1_000_000));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    stats.increment_extracted();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        stats.flush().await.unwrap();
        assert_eq!(store.last().unwrap().stats.extracted, 2000);
        assert_eq!(stats.pending_ops(), 0);
    }

    #[tokio::test]
    async fn test_should_flush_on_batch_size() {
        let store = Arc::new(RecordingSessionStore::default());
        let stats = accumulator(store, Duration::from_secs(60), 3);

        stats.increment_discovered();
        stats.increment_extracted();
        assert!(!stats.should_flush());
        stats.increment_errors();
        assert!(stats.should_flush());
    }

    #[tokio::test]
    async fn test_should_flush_on_interval() {
        let store = Arc::new(RecordingSessionStore::default());
        let stats = accumulator(store, Duration::from_millis(20), 1_000);
        assert!(!stats.should_flush());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(stats.should_flush());

        stats.flush().await.unwrap();
        assert!(!stats.should_flush());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_counts() {
        let store = Arc::new(RecordingSessionStore::failing(2));
        let stats = accumulator(store.clone(), Duration::from_secs(60), 2);

        stats.increment_uploaded();
        stats.increment_uploaded();
        assert!(stats.flush().await.is_err());
        assert!(stats.flush().await.is_err());
        assert_eq!(stats.consecutive_failures(), 2);
        assert_eq!(stats.pending_ops(), 2);
        assert!(stats.should_flush());

        stats.increment_skipped();
        stats.flush().await.unwrap();
        assert_eq!(stats.consecutive_failures(), 0);
        assert_eq!(stats.pending_ops(), 0);

        let persisted = store.last().unwrap().stats;
        assert_eq!(persisted.uploaded, 2);
        assert_eq!(persisted.skipped, 1);
    }

    #[tokio::test]
    async fn test_seeded_from_existing_stats() {
        let store = Arc::new(RecordingSessionStore::default());
        let mut session = SyncSession::start("user", "/books");
        session.stats.discovered = 10;
        session.stats.extracted = 9;

        let stats = StatsAccumulator::new(store.clone(), session, Duration::from_secs(60), 50);
        stats.increment_approved();
        assert_eq!(stats.pending_ops(), 1);

        let finished = stats.finalize(SessionStatus::Completed).await.unwrap();
        assert_eq!(finished.stats.discovered, 10);
        assert_eq!(finished.stats.extracted, 9);
        assert_eq!(finished.stats.approved, 1);
        assert_eq!(finished.status, SessionStatus::Completed);
        assert!(finished.completed_at.is_some());
        assert_eq!(store.last().unwrap(), finished);
    }

    #[test]
    fn test_escalation_schedule() {
        let mut escalation = FlushEscalation::new(3, 7);
        let notices: Vec<_> = (0..=8).map(|n| escalation.on_failure(n)).collect();
        assert_eq!(
            notices,
            vec![
                None,
                Some(FlushNotice::FirstFailure),
                None,
                Some(FlushNotice::Reminder),
                None,
                None,
                Some(FlushNotice::Reminder),
                Some(FlushNotice::GaveUp),
                None,
            ]
        );
    }

    #[test]
    fn test_escalation_fires_on_skipped_counts() {
        let mut escalation = FlushEscalation::new(5, 20);
        assert_eq!(escalation.on_failure(2), Some(FlushNotice::FirstFailure));
        assert_eq!(escalation.on_failure(4), None);
        assert_eq!(escalation.on_failure(7), Some(FlushNotice::Reminder));
        assert_eq!(escalation.on_failure(9), None);
        assert_eq!(escalation.on_failure(21), Some(FlushNotice::GaveUp));
        assert_eq!(escalation.on_failure(22), None);

        assert!(escalation.on_success());
        assert!(!escalation.on_success());
        assert_eq!(escalation.on_failure(1), Some(FlushNotice::FirstFailure));
    }

    #[test]
    fn test_escalation_first_failure_past_ceiling_gives_up() {
        let mut escalation = FlushEscalation::new(5, 3);
        assert_eq!(escalation.on_failure(4), Some(FlushNotice::GaveUp));
        assert_eq!(escalation.on_failure(5), None);
    }

    #[tokio::test]
    async fn test_supervisor_announces_failure_from_worker_flush() {
        let store = Arc::new(RecordingSessionStore::failing(3));
        let stats = Arc::new(accumulator(store.clone(), Duration::from_millis(10), 1_000));
        stats.increment_extracted();
        assert!(stats.flush().await.is_err());

        let (sink, mut rx) = ProgressSink::channel(16);
        let cancel = CancellationToken::new();
        let handle = FlushSupervisor::new(stats.clone(), Duration::from_millis(10))
            .with_progress(sink)
            .spawn(cancel.clone());

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let progress = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("supervisor notice")
                .expect("channel open");
            seen.push(progress);
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(seen[0].kind, ProgressKind::Error);
        assert!(seen[0].message.starts_with("stats flush failing"));
        assert_eq!(seen[1].message, "stats flush recovered");
        assert_eq!(store.last().unwrap().stats.extracted, 1);
    }

    #[tokio::test]
    async fn test_supervisor_escalates_and_recovers() {
        let store = Arc::new(RecordingSessionStore::failing(3));
        let stats = Arc::new(accumulator(store.clone(), Duration::from_millis(10), 1_000));
        stats.increment_discovered();

        let (sink, mut rx) = ProgressSink::channel(16);
        let cancel = CancellationToken::new();
        let handle = FlushSupervisor::new(stats.clone(), Duration::from_millis(10))
            .with_escalation(2, 3)
            .with_progress(sink)
            .spawn(cancel.clone());

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let progress = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("supervisor notice")
                .expect("channel open");
            seen.push(progress);
        }
        cancel.cancel();
        handle.await.unwrap();

        let kinds: Vec<_> = seen.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressKind::Error,
                ProgressKind::Error,
                ProgressKind::Error,
                ProgressKind::Status
            ]
        );
        assert!(seen[0].message.starts_with("stats flush failing"));
        assert!(seen[1].message.contains("after 2 attempts"));
        assert!(seen[2].message.contains("3 times in a row"));
        assert_eq!(seen[3].message, "stats flush recovered");
        assert_eq!(store.last().unwrap().stats.discovered, 1);
    }
}
