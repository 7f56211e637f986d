//! Runtime handle access.
//!
//! Most code never needs this module. It exists for the few places that run
//! outside an async context but still have to hand work to the runtime, such
//! as a blocking directory walker pushing into a bounded channel or a tracing
//! layer forwarding events to the host.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Returns a handle to the current runtime, if called from within one.
pub fn try_current() -> Option<Handle> {
    Handle::try_current().ok()
}
