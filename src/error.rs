//! The errno-compatible error domain described in spec.md §6/§7.

use std::fmt;

/// Numeric error domain mirroring POSIX `errno` codes used throughout the
/// original C library. Every public entry point returns `Result<T, Error>`
/// instead of an out-parameter `int`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Try-variant declined, or `destroy` called on an object still in use.
    #[error("object is busy")]
    Busy,
    /// Invalid argument or invalid object state.
    #[error("invalid argument or state")]
    Invalid,
    /// The wait target had already completed before the wait began.
    #[error("wait target already completed")]
    SearchFailed,
    /// Operation not permitted in the object's current state.
    #[error("operation not permitted in current state")]
    NotPermitted,
    /// Feature not available in this build/platform.
    #[error("feature not implemented")]
    NotSupported,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fatal: an internal handshake invariant was violated (e.g. a mutex
/// operation that the protocol guarantees will succeed, failed). Per
/// spec.md §7, this is a correctness rail, not a recoverable condition, so
/// it aborts the process rather than unwinding (a panic could be caught by
/// an enclosing `catch_unwind`, defeating the guarantee).
pub fn abort_on_violation(msg: &str) -> ! {
    log::error!("mutexgear: fatal handshake invariant violation: {msg}");
    std::process::abort()
}

impl fmt::Display for AllMarkedSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all items in the scanned range are already marked")
    }
}

/// Private sentinel used only internally by the writer's tail-scan
/// (spec.md §6: "a private code denotes 'all items marked' used only
/// internally") — never returned from a public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllMarkedSentinel;
