//! Reader-push locks: writer-side choke points that serialize against
//! reader fast-path appends while a writer tail-scans `acquired_reads`
//! (spec.md §3, §4.6 "write acquisition" step 3).
//!
//! A writer does not need these to keep correctness of the handshake
//! itself (a reader racing the express stack either lands in the batch the
//! writer's tail-scan will still see, or fails to and falls back to the
//! locked path) — they exist purely to bound how long the tail-scan can be
//! extended by a steady trickle of new express commits, by making new
//! fast-path pushes contend with the writer's held range instead of racing
//! it forever. `write-channel count` ∈ {1, 2, 4} controls how many
//! independent push locks exist; a writer picks a starting index from a
//! hash of its waiter's address and widens the held range by one slot each
//! time it observes `express_commits` changed since the range was last
//! extended (spec.md's `original_source/src/rwlock.c`
//! `rwlock_wrlock_push_readers_waiting_to_acquire_access__multiple_channels`).

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::sys::RawLock;

pub const MAX_CHANNELS: usize = 4;

/// `write-channel count` ∈ {1, 2, 4} (spec.md §6 attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCount {
    One,
    Two,
    Four,
}

impl ChannelCount {
    fn count(self) -> usize {
        match self {
            ChannelCount::One => 1,
            ChannelCount::Two => 2,
            ChannelCount::Four => 4,
        }
    }

    fn mask(self) -> usize {
        self.count() - 1
    }
}

impl Default for ChannelCount {
    fn default() -> Self {
        ChannelCount::One
    }
}

pub struct ReaderPushLocks {
    locks: [RawLock; MAX_CHANNELS],
    channels: ChannelCount,
}

/// A held, contiguous range of push-lock indices, released in reverse
/// acquisition order on drop of the returned guard's caller (explicit
/// `release` call, matching the rest of this crate's lock-step style).
pub struct PushLockRange {
    start: usize,
    held: usize,
}

impl ReaderPushLocks {
    pub fn new(channels: ChannelCount) -> Self {
        Self {
            locks: [RawLock::new(), RawLock::new(), RawLock::new(), RawLock::new()],
            channels,
        }
    }

    fn index_for_waiter(&self, waiter_ptr: *const ()) -> usize {
        // A simple multiplicative hash of the waiter's address, matching
        // the original's "derive the array index from the waiter pointer"
        // (`_MUTEXGEAR_RWLOCK_MAKE_READER_PUSH_SELECTOR`).
        let h = (waiter_ptr as usize).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (h >> (usize::BITS - 8)) & self.channels.mask()
    }

    /// Acquire the single starting lock for `waiter_ptr`. Returns the held
    /// range (of width 1) so the caller can widen or release it.
    pub fn acquire_start(&self, waiter_ptr: *const ()) -> PushLockRange {
        let start = self.index_for_waiter(waiter_ptr);
        self.locks[start & self.channels.mask()].acquire();
        PushLockRange { start, held: 1 }
    }

    /// Widen the held range by one more consecutive (wrapping) index.
    pub fn widen(&self, range: &mut PushLockRange) {
        if range.held >= self.channels.count() {
            return;
        }
        let next = (range.start + range.held) & self.channels.mask();
        self.locks[next].acquire();
        range.held += 1;
    }

    pub fn release(&self, range: PushLockRange) {
        for i in (0..range.held).rev() {
            let idx = (range.start + i) & self.channels.mask();
            self.locks[idx].release();
        }
    }

    pub fn try_destroy(&self) -> Result<()> {
        for i in 0..self.channels.count() {
            self.locks[i].try_destroy()?;
        }
        Ok(())
    }
}

/// Tracks the `express_commits` value observed when a push-lock range was
/// last (re)validated; widening only happens if the counter has moved
/// since, mirroring the original's "stay with the current locked mutex
/// range... if not changed" branch (spec.md §4.6, §5).
pub struct ExpressCommitsWatch {
    last_seen: u64,
}

impl ExpressCommitsWatch {
    pub fn new(counter: &std::sync::atomic::AtomicU64) -> Self {
        Self {
            last_seen: counter.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` (and updates the watermark) if the counter changed
    /// since the watermark was last taken.
    pub fn changed_since(&mut self, counter: &std::sync::atomic::AtomicU64) -> bool {
        let now = counter.load(Ordering::Relaxed);
        if now != self.last_seen {
            self.last_seen = now;
            true
        } else {
            false
        }
    }
}
