//! TRDL: the try-read extension (spec.md §3, §4.6 "RWLock (TRDL
//! extension)").
//!
//! Adds three things on top of [`RwLockCore`]: a permanent sentinel item
//! kept in `acquired_reads` so the queue never looks empty to a writer's
//! ordinary tail-scan, a dedicated `tryread_queue_lock` serializing
//! non-blocking read attempts against writer arrivals, and `wrlock_waits` —
//! a counter whose low bit publishes "a writer has passed the barrier" and
//! whose remaining bits count how many writers have arrived.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::completion::CompletionItem;
use crate::error::Result;
use crate::sys::{RawLock, RwLockAttr};

use super::core::{RwLockCore, WaitingReadersPromotion, WriteToken};
use super::pushlocks::ChannelCount;

const WRITER_ARRIVAL: i64 = 2;
const BARRIER_PASSED_BIT: i64 = 1;

/// `tryrdlock` result token; release with [`TrdlRwLockCore::tryrdunlock`].
pub struct TryReadToken {
    item: Box<CompletionItem>,
}

pub struct TrdlRwLockCore {
    core: RwLockCore,
    separator: Box<CompletionItem>,
    tryread_queue_lock: RawLock,
    wrlock_waits: AtomicI64,
}

impl TrdlRwLockCore {
    pub fn new(channels: ChannelCount) -> Self {
        Self::with_attr(RwLockAttr::default(), channels)
    }

    /// Same as [`TrdlRwLockCore::new`], additionally accepting the rwlock
    /// attribute object, forwarded into the inner [`RwLockCore`].
    pub fn with_attr(attr: RwLockAttr, channels: ChannelCount) -> Self {
        let separator = Box::new(CompletionItem::new());
        separator.mark_trdl_separator();
        let core = RwLockCore::with_attr(attr, channels);
        {
            let token = core.acquired_reads.lock();
            core.acquired_reads.enqueue(&separator, Some(&token));
            core.acquired_reads.unlock(token);
        }
        Self {
            core,
            separator,
            tryread_queue_lock: RawLock::new(),
            wrlock_waits: AtomicI64::new(0),
        }
    }

    pub fn attr(&self) -> &RwLockAttr {
        self.core.attr()
    }

    pub fn rdlock(&self) -> super::core::ReadToken {
        self.core.rdlock()
    }

    pub fn rdunlock(&self, token: super::core::ReadToken) {
        self.core.rdunlock(token)
    }

    /// Spec.md §4.6 "Try-read (TRDL extension only)".
    pub fn tryrdlock(&self) -> Option<TryReadToken> {
        if self.wrlock_waits.load(Ordering::Acquire) != 0 {
            log::trace!("mutexgear: tryrdlock rejected, a writer has already arrived");
            return None;
        }

        self.tryread_queue_lock.acquire();
        let admitted = self.wrlock_waits.load(Ordering::Acquire) == 0;
        if !admitted {
            log::trace!("mutexgear: tryrdlock rejected, a writer arrived while queueing");
        }
        let token = if admitted {
            let item = Box::new(CompletionItem::new());
            let qtoken = self.core.acquired_reads.lock();
            // Appended after the separator: the separator is the permanent
            // head, everything real lives at the tail behind it.
            self.core.acquired_reads.enqueue(&item, Some(&qtoken));
            self.core.acquired_reads.unlock(qtoken);
            Some(TryReadToken { item })
        } else {
            None
        };
        self.tryread_queue_lock.release();
        token
    }

    pub fn tryrdunlock(&self, token: TryReadToken) {
        let TryReadToken { item } = token;
        let qtoken = self.core.acquired_reads.lock();
        self.core.acquired_reads.unsafe_dequeue(&item, &qtoken);
        self.core.acquired_reads.unlock(qtoken);
    }

    /// Writer arrival: bump the counter by 2, and if we are the first
    /// writer since the barrier was last clear, drain any try-read that is
    /// still in flight by taking and releasing `tryread_queue_lock` before
    /// publishing the barrier (spec.md §4.6 TRDL).
    fn record_wrlock_arrival(&self) {
        let prior = self.wrlock_waits.fetch_add(WRITER_ARRIVAL, Ordering::AcqRel);
        if prior & BARRIER_PASSED_BIT == 0 {
            self.tryread_queue_lock.acquire();
            self.tryread_queue_lock.release();
            self.wrlock_waits.fetch_or(BARRIER_PASSED_BIT, Ordering::Release);
        }
    }

    fn record_wrlock_departure(&self) {
        loop {
            let cur = self.wrlock_waits.load(Ordering::Acquire);
            let remaining = cur - WRITER_ARRIVAL;
            // The last writer to leave also clears the barrier bit, so a
            // future writer redoes the tryread_queue_lock drain instead of
            // inheriting a stale "barrier already passed" flag.
            let next = if remaining <= BARRIER_PASSED_BIT { 0 } else { remaining };
            if self
                .wrlock_waits
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// `wrlock_waits` stays incremented for the writer's *entire* hold, not
    /// just the call to acquire it: it is only decremented in
    /// [`TrdlRwLockCore::wrunlock`], right before the underlying access_lock
    /// is actually released (mirroring the original's
    /// `mutexgear_trdl_rwlock_wrunlock` — decrementing any earlier would let
    /// a concurrent `tryrdlock` observe `wrlock_waits == 0` while a writer
    /// still holds exclusive access).
    pub fn wrlock(&self, wp: WaitingReadersPromotion) -> WriteToken<'_> {
        self.record_wrlock_arrival();
        self.core.wrlock(wp)
    }

    pub fn trywrlock(&self) -> Option<WriteToken<'_>> {
        self.record_wrlock_arrival();
        match self.core.trywrlock() {
            Some(token) => Some(token),
            None => {
                self.record_wrlock_departure();
                None
            }
        }
    }

    pub fn wrunlock(&self, token: WriteToken<'_>) {
        self.record_wrlock_departure();
        self.core.wrunlock(token)
    }

    pub fn try_destroy(&self) -> Result<()> {
        {
            let token = self.core.acquired_reads.lock();
            self.core.acquired_reads.unsafe_dequeue(&self.separator, &token);
            self.core.acquired_reads.unlock(token);
        }
        self.tryread_queue_lock.try_destroy()?;
        self.core.try_destroy()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tryrdlock_succeeds_with_no_writers() {
        let lock = TrdlRwLockCore::new(ChannelCount::One);
        let t1 = lock.tryrdlock().expect("first try-read should be admitted");
        let t2 = lock.tryrdlock().expect("second try-read should be admitted");
        lock.tryrdunlock(t1);
        lock.tryrdunlock(t2);
    }

    #[test]
    fn tryrdlock_fails_once_a_writer_has_arrived() {
        let lock = TrdlRwLockCore::new(ChannelCount::One);
        let wtoken = lock.wrlock(WaitingReadersPromotion::Immediate);
        assert!(lock.tryrdlock().is_none());
        lock.wrunlock(wtoken);
    }

    #[test]
    fn write_after_write_is_mutually_exclusive() {
        let lock = TrdlRwLockCore::new(ChannelCount::One);
        let w1 = lock.wrlock(WaitingReadersPromotion::Immediate);
        assert!(lock.trywrlock().is_none());
        lock.wrunlock(w1);
        let w2 = lock.wrlock(WaitingReadersPromotion::Immediate);
        lock.wrunlock(w2);
    }
}
