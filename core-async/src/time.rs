//! Time-related abstractions.
//!
//! Timers and intervals come from `tokio::time` so they integrate with the
//! runtime's timer wheel; `Instant` and `Duration` are the std types.

pub use tokio::time::{
    interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep, Timeout,
};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
