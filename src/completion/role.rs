//! Role objects carried by application threads (spec.md glossary:
//! "Worker / Waiter"). A worker owns a wheel (the progress publisher); a
//! waiter owns a detach mutex (the handshake listener).

use crate::error::Result;
use crate::sys::RawLock;
use crate::wheel::Wheel;

/// Owned by the thread currently processing a completion item. A worker is
/// single-owner for the duration of its lifecycle (spec.md §3).
pub struct Worker {
    pub(crate) wheel: Wheel,
}

impl Worker {
    pub fn new() -> Self {
        Self { wheel: Wheel::new() }
    }

    /// Engage the worker's wheel so it can start publishing progress.
    pub fn start(&self) -> Result<()> {
        self.wheel.engage()
    }

    /// Publish forward progress. Never blocks (spec.md §4.1).
    pub fn advance(&self) -> Result<()> {
        self.wheel.advance()
    }

    /// Detach from the wheel once no item references this worker anymore.
    pub fn stop(&self) -> Result<()> {
        self.wheel.disengage()
    }

    pub fn try_destroy(&self) -> Result<()> {
        self.wheel.try_destroy()
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned by a thread waiting for a completion item. The `wait_detach_lock`
/// is the handshake listener half of the paired acquire-and-release
/// described in spec.md §4.2.
pub struct Waiter {
    pub(crate) wait_detach_lock: RawLock,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            wait_detach_lock: RawLock::new(),
        }
    }

    pub fn try_destroy(&self) -> Result<()> {
        self.wait_detach_lock.try_destroy()
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}
