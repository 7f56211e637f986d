//! Async runtime abstraction layer for the filesync core.
//!
//! All `core-*` and `bridge-*` crates take their async primitives from this
//! crate instead of depending on tokio directly. That keeps the runtime choice
//! in one place and gives every crate the same names for the same things.
//!
//! # Modules
//!
//! - `runtime`: Handle access for code that must reach the runtime from sync contexts
//! - `sync`: Synchronization primitives, channels and cancellation
//! - `task`: Task spawning, blocking offload and task sets
//! - `time`: Timers, intervals and monotonic instants
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let cancel = CancellationToken::new();
//!     let child = cancel.child_token();
//!
//!     let handle = task::spawn(async move {
//!         core_async::select! {
//!             _ = child.cancelled() => 0,
//!             _ = sleep(Duration::from_secs(1)) => 42,
//!         }
//!     });
//!
//!     cancel.cancel();
//!     let _ = handle.await;
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use futures::future::BoxFuture;
pub use tokio::select;
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
