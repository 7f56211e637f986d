//! # Pipeline Configuration
//!
//! Numeric tunables for the sync pipeline.
//!
//! ## Overview
//!
//! [`PipelineConfig`] carries sensible defaults, `with_*` builder methods and
//! fail-fast validation. Collaborators (discoverer, stores, uploader...) are
//! not part of this struct; they are injected into the pipeline builder,
//! which refuses to build when one is missing.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::PipelineConfig;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::default()
//!     .with_concurrent_jobs(4)
//!     .with_stats_batch_interval(Duration::from_secs(1));
//! config.validate().unwrap();
//! ```
//!
//! ## Environment
//!
//! [`PipelineConfig::from_env`] overlays the defaults with:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FILESYNC_CONCURRENT_JOBS` | `concurrent_jobs` |
//! | `FILESYNC_PROGRESS_BUFFER_SIZE` | `progress_buffer_size` |
//! | `FILESYNC_STATS_BATCH_INTERVAL_MS` | `stats_batch_interval` |
//! | `FILESYNC_STATS_BATCH_SIZE` | `stats_batch_size` |
//! | `FILESYNC_STATS_REMINDER_EVERY` | `stats_failure_reminder_every` |
//! | `FILESYNC_STATS_MAX_FLUSH_FAILURES` | `stats_max_flush_failures` |
//!
//! Negative or non-numeric values are rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_CONCURRENT_JOBS: &str = "FILESYNC_CONCURRENT_JOBS";
pub const ENV_PROGRESS_BUFFER_SIZE: &str = "FILESYNC_PROGRESS_BUFFER_SIZE";
pub const ENV_STATS_BATCH_INTERVAL_MS: &str = "FILESYNC_STATS_BATCH_INTERVAL_MS";
pub const ENV_STATS_BATCH_SIZE: &str = "FILESYNC_STATS_BATCH_SIZE";
pub const ENV_STATS_REMINDER_EVERY: &str = "FILESYNC_STATS_REMINDER_EVERY";
pub const ENV_STATS_MAX_FLUSH_FAILURES: &str = "FILESYNC_STATS_MAX_FLUSH_FAILURES";

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of files extracted concurrently
    pub concurrent_jobs: usize,

    /// Capacity of the progress channel handed to callers.
    /// Zero is accepted and treated as the smallest possible buffer.
    pub progress_buffer_size: usize,

    /// Maximum time between stats flushes
    pub stats_batch_interval: Duration,

    /// Counter increments that force a stats flush before the interval elapses
    pub stats_batch_size: u64,

    /// Emit a reminder every N consecutive failed stats flushes
    pub stats_failure_reminder_every: u32,

    /// Consecutive failed flushes after which a final notice is sent
    pub stats_max_flush_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrent_jobs: 8,
            progress_buffer_size: 100,
            stats_batch_interval: Duration::from_millis(500),
            stats_batch_size: 50,
            stats_failure_reminder_every: 5,
            stats_max_flush_failures: 20,
        }
    }
}

impl PipelineConfig {
    pub fn with_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.concurrent_jobs = jobs;
        self
    }

    pub fn with_progress_buffer_size(mut self, size: usize) -> Self {
        self.progress_buffer_size = size;
        self
    }

    pub fn with_stats_batch_interval(mut self, interval: Duration) -> Self {
        self.stats_batch_interval = interval;
        self
    }

    pub fn with_stats_batch_size(mut self, size: u64) -> Self {
        self.stats_batch_size = size;
        self
    }

    pub fn with_stats_failure_reminder_every(mut self, every: u32) -> Self {
        self.stats_failure_reminder_every = every;
        self
    }

    pub fn with_stats_max_flush_failures(mut self, max: u32) -> Self {
        self.stats_max_flush_failures = max;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_jobs < 1 {
            return Err(Error::Config(
                "concurrent_jobs must be at least 1".to_string(),
            ));
        }

        if self.stats_batch_interval.is_zero() {
            return Err(Error::Config(
                "stats_batch_interval must be greater than zero".to_string(),
            ));
        }

        if self.stats_batch_size < 1 {
            return Err(Error::Config(
                "stats_batch_size must be at least 1".to_string(),
            ));
        }

        if self.stats_failure_reminder_every < 1 {
            return Err(Error::Config(
                "stats_failure_reminder_every must be at least 1".to_string(),
            ));
        }

        if self.stats_max_flush_failures < 1 {
            return Err(Error::Config(
                "stats_max_flush_failures must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from process environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup on top of the defaults, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(jobs) = read_count(&lookup, ENV_CONCURRENT_JOBS)? {
            config.concurrent_jobs = to_usize(ENV_CONCURRENT_JOBS, jobs)?;
        }
        if let Some(size) = read_count(&lookup, ENV_PROGRESS_BUFFER_SIZE)? {
            config.progress_buffer_size = to_usize(ENV_PROGRESS_BUFFER_SIZE, size)?;
        }
        if let Some(millis) = read_count(&lookup, ENV_STATS_BATCH_INTERVAL_MS)? {
            config.stats_batch_interval = Duration::from_millis(millis);
        }
        if let Some(size) = read_count(&lookup, ENV_STATS_BATCH_SIZE)? {
            config.stats_batch_size = size;
        }
        if let Some(every) = read_count(&lookup, ENV_STATS_REMINDER_EVERY)? {
            config.stats_failure_reminder_every = to_u32(ENV_STATS_REMINDER_EVERY, every)?;
        }
        if let Some(max) = read_count(&lookup, ENV_STATS_MAX_FLUSH_FAILURES)? {
            config.stats_max_flush_failures = to_u32(ENV_STATS_MAX_FLUSH_FAILURES, max)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_count<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let value: i64 = raw.parse().map_err(|_| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("'{raw}' is not a number"),
    })?;

    u64::try_from(value).map(Some).map_err(|_| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("{value} must not be negative"),
    })
}

fn to_usize(key: &str, value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("{value} is too large"),
    })
}

fn to_u32(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("{value} is too large"),
    })
}
