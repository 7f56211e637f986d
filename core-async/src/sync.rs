//! Synchronization primitives.
//!
//! Async-aware locks, channels and counting semaphores from `tokio::sync`,
//! plus cooperative cancellation from `tokio_util`.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{mpsc, CancellationToken, Mutex};
//!
//! async fn example() {
//!     let mutex = Mutex::new(42);
//!     *mutex.lock().await += 1;
//!
//!     let (tx, mut rx) = mpsc::channel::<u32>(8);
//!     let cancel = CancellationToken::new();
//!
//!     tx.send(1).await.ok();
//!     core_async::select! {
//!         _ = cancel.cancelled() => {}
//!         value = rx.recv() => assert_eq!(value, Some(1)),
//!     }
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, AcquireError, Mutex, MutexGuard, Notify, OwnedSemaphorePermit,
    RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
