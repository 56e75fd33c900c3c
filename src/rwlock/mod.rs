//! A reader-writer lock with bounded writer latency (spec.md §3, §4.6).
//!
//! [`RwLock<T>`] wraps [`core::RwLockCore`] the way `std::sync::RwLock`
//! wraps its platform primitive: a `T` behind an `UnsafeCell`, handed out
//! through RAII guards that release on drop. [`TrdlRwLock<T>`] is the same
//! shape built on the TRDL-extended core, additionally exposing
//! [`TrdlRwLock::try_read`].

pub mod core;
pub mod express;
pub mod pushlocks;
pub mod trdl;

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

pub use core::{RwLockCore, WaitingReadersPromotion};
pub use pushlocks::ChannelCount;
pub use trdl::TrdlRwLockCore;

use crate::sys::RwLockAttr;

/// A reader-writer lock. `readers_till_wp` controls how many readers may
/// still take the fast path after a writer has announced itself (spec.md
/// §4.6 "Waiting-readers promotion"); pick it per call site via
/// [`RwLock::write_with`] or rely on the type's default ([`RwLock::write`]).
pub struct RwLock<T> {
    core: RwLockCore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self::with_channels(value, ChannelCount::One)
    }

    pub fn with_channels(value: T, channels: ChannelCount) -> Self {
        Self {
            core: RwLockCore::new(channels),
            data: UnsafeCell::new(value),
        }
    }

    /// Same as [`RwLock::with_channels`], additionally accepting the rwlock
    /// attribute object spec.md §6 lists as part of the external interface
    /// (stored only; see `sys::attr` module docs).
    pub fn with_attr(value: T, attr: RwLockAttr, channels: ChannelCount) -> Self {
        Self {
            core: RwLockCore::with_attr(attr, channels),
            data: UnsafeCell::new(value),
        }
    }

    pub fn attr(&self) -> &RwLockAttr {
        self.core.attr()
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        let token = self.core.rdlock();
        ReadGuard { lock: self, token: Some(token) }
    }

    /// Acquire for write, using [`WaitingReadersPromotion::Immediate`].
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.write_with(WaitingReadersPromotion::Immediate)
    }

    pub fn write_with(&self, wp: WaitingReadersPromotion) -> WriteGuard<'_, T> {
        let token = self.core.wrlock(wp);
        WriteGuard { lock: self, token: Some(token) }
    }

    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        let token = self.core.trywrlock()?;
        Some(WriteGuard { lock: self, token: Some(token) })
    }

    /// Only valid when no guard derived from this lock is outstanding;
    /// matches the underlying completion objects' "busy" semantics rather
    /// than panicking (spec.md §6 "destroy ... busy").
    pub fn try_into_inner(self) -> Result<T, (Self, crate::error::Error)> {
        match self.core.try_destroy() {
            Ok(()) => Ok(self.data.into_inner()),
            Err(e) => Err((self, e)),
        }
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    token: Option<core::ReadToken>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.core.rdunlock(token);
        }
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    token: Option<core::WriteToken<'a>>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.core.wrunlock(token);
        }
    }
}

/// The TRDL-extended lock, additionally exposing a non-blocking
/// [`TrdlRwLock::try_read`] that degrades gracefully in the presence of
/// writers instead of always contending for `access_lock` (spec.md §4.6
/// "RWLock (TRDL extension)").
pub struct TrdlRwLock<T> {
    core: TrdlRwLockCore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TrdlRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for TrdlRwLock<T> {}

impl<T> TrdlRwLock<T> {
    pub fn new(value: T) -> Self {
        Self::with_channels(value, ChannelCount::One)
    }

    pub fn with_channels(value: T, channels: ChannelCount) -> Self {
        Self {
            core: TrdlRwLockCore::new(channels),
            data: UnsafeCell::new(value),
        }
    }

    /// Same as [`TrdlRwLock::with_channels`], additionally accepting the
    /// rwlock attribute object, forwarded into the inner [`TrdlRwLockCore`].
    pub fn with_attr(value: T, attr: RwLockAttr, channels: ChannelCount) -> Self {
        Self {
            core: TrdlRwLockCore::with_attr(attr, channels),
            data: UnsafeCell::new(value),
        }
    }

    pub fn attr(&self) -> &RwLockAttr {
        self.core.attr()
    }

    pub fn read(&self) -> TrdlReadGuard<'_, T> {
        let token = self.core.rdlock();
        TrdlReadGuard { lock: self, token: Some(token) }
    }

    pub fn try_read(&self) -> Option<TrdlTryReadGuard<'_, T>> {
        let token = self.core.tryrdlock()?;
        Some(TrdlTryReadGuard { lock: self, token: Some(token) })
    }

    pub fn write(&self) -> TrdlWriteGuard<'_, T> {
        self.write_with(WaitingReadersPromotion::Immediate)
    }

    pub fn write_with(&self, wp: WaitingReadersPromotion) -> TrdlWriteGuard<'_, T> {
        let token = self.core.wrlock(wp);
        TrdlWriteGuard { lock: self, token: Some(token) }
    }

    pub fn try_write(&self) -> Option<TrdlWriteGuard<'_, T>> {
        let token = self.core.trywrlock()?;
        Some(TrdlWriteGuard { lock: self, token: Some(token) })
    }
}

pub struct TrdlReadGuard<'a, T> {
    lock: &'a TrdlRwLock<T>,
    token: Option<core::ReadToken>,
}

impl<'a, T> Deref for TrdlReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for TrdlReadGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.core.rdunlock(token);
        }
    }
}

pub struct TrdlTryReadGuard<'a, T> {
    lock: &'a TrdlRwLock<T>,
    token: Option<trdl::TryReadToken>,
}

impl<'a, T> Deref for TrdlTryReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for TrdlTryReadGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.core.tryrdunlock(token);
        }
    }
}

pub struct TrdlWriteGuard<'a, T> {
    lock: &'a TrdlRwLock<T>,
    token: Option<core::WriteToken<'a>>,
}

impl<'a, T> Deref for TrdlWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for TrdlWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for TrdlWriteGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.core.wrunlock(token);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_writer_then_single_reader() {
        let lock = RwLock::new(5);
        {
            let mut w = lock.write();
            *w += 1;
        }
        assert_eq!(*lock.read(), 6);
    }

    #[test]
    fn many_readers_see_consistent_value() {
        let lock = Arc::new(RwLock::new(42));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    let r = lock.read();
                    assert_eq!(*r, 42);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn writer_excludes_readers_and_writers() {
        let lock = Arc::new(RwLock::new(0i64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    *lock.write() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.read(), 800);
    }

    #[test]
    fn trdl_try_read_then_write() {
        let lock = TrdlRwLock::new(String::from("hi"));
        {
            let r = lock.try_read().expect("uncontended try-read");
            assert_eq!(&*r, "hi");
        }
        {
            let mut w = lock.write();
            w.push_str(" there");
        }
        assert_eq!(&*lock.read(), "hi there");
    }
}
