//! `RawLock`: the "system mutex with try-lock" surface spec.md §6 names as
//! consumed from the environment. Unlike `std::sync::Mutex`, callers manage
//! acquire/release explicitly (a guard is not tied to the acquiring scope),
//! because the wheel and the completion handshake hand a held lock from one
//! logical step to another rather than from one lexical scope to another —
//! exactly the shape `_mutexgear_lock_tryacquire`/`_acquire`/`_release` have
//! in the original.
//!
//! Built on `std::sync::{Mutex, Condvar}` rather than a spin loop: spec.md §5
//! requires threads to block on the underlying primitive with "no busy
//! waiting", which a spinlock (the teacher crate's `spin::mutex::TicketMutex`)
//! cannot satisfy once this crate targets real OS threads instead of a
//! kernel's own run queue.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};

/// A plain, non-reentrant mutex with an explicit try/acquire/release API.
///
/// `RawLock::new` corresponds to `_mutexgear_lock_init`; there is no
/// separate `destroy` step since `std::sync` types clean up on `Drop`, but
/// [`RawLock::try_destroy`] is provided for parity with the original's
/// "destroy fails with `EBUSY` if the lock is held" contract (spec.md §7).
pub struct RawLock {
    locked: Mutex<bool>,
    avail: Condvar,
}

impl RawLock {
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            avail: Condvar::new(),
        }
    }

    /// Non-blocking acquire. Never blocks; returns `Err(Error::Busy)` if the
    /// lock is currently held.
    pub fn try_acquire(&self) -> Result<()> {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        if *locked {
            log::trace!("mutexgear: try_acquire found the lock busy");
            return Err(Error::Busy);
        }
        *locked = true;
        Ok(())
    }

    /// Blocking acquire. The calling thread is parked on the OS condition
    /// variable, never spun.
    pub fn acquire(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        while *locked {
            locked = self
                .avail
                .wait(locked)
                .unwrap_or_else(|e| e.into_inner());
        }
        *locked = true;
    }

    /// Release a lock acquired by `try_acquire`/`acquire`, possibly on a
    /// different step of the same thread (e.g. wheel `advance`). Always
    /// succeeds for a lock actually held; releasing an unheld lock is a
    /// caller bug, so in debug builds it is checked.
    pub fn release(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(*locked, "releasing a RawLock that was not held");
        *locked = false;
        self.avail.notify_one();
    }

    /// Equivalent of destroy: fails with `Busy` if the lock is currently
    /// held, mirroring spec.md §7 ("destroy on a still-populated/-held
    /// object fails with EBUSY and leaves the object unchanged").
    pub fn try_destroy(&self) -> Result<()> {
        let locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        if *locked {
            return Err(Error::Busy);
        }
        Ok(())
    }
}

impl Default for RawLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_acquire_is_exclusive() {
        let lock = RawLock::new();
        assert!(lock.try_acquire().is_ok());
        assert_eq!(lock.try_acquire(), Err(Error::Busy));
        lock.release();
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn acquire_blocks_until_released() {
        let lock = Arc::new(RawLock::new());
        lock.try_acquire().unwrap();

        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            lock2.acquire();
            lock2.release();
        });

        thread::sleep(Duration::from_millis(20));
        lock.release();
        handle.join().unwrap();
    }

    #[test]
    fn destroy_fails_while_held() {
        let lock = RawLock::new();
        lock.try_acquire().unwrap();
        assert_eq!(lock.try_destroy(), Err(Error::Busy));
        lock.release();
        assert!(lock.try_destroy().is_ok());
    }
}
