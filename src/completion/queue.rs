//! The basic completion queue (spec.md §3, §4.3).

use std::ptr::NonNull;

use crate::error::{self, Error, Result};
use crate::list::{Iter, IterRev, List};
use crate::sys::{CompletionAttr, RawLock};
#[cfg(test)]
use crate::sys::ManualEvent;

use super::item::CompletionItem;
use super::role::{Waiter, Worker};

/// Proof that the caller currently holds `queue.access_lock`, returned by
/// [`BasicQueue::lock`] and consumed by the methods that require it. This
/// is the "opaque token" of spec.md §4.3: it exists only to let call sites
/// prove, at compile time, that they are already inside the critical
/// section.
pub struct QueueToken<'a> {
    queue: &'a BasicQueue,
}

/// An ordered sequence of completion items plus an access-serialization
/// mutex and a worker-detach handshake mutex (spec.md §3).
pub struct BasicQueue {
    pub(crate) items: List<CompletionItem>,
    access_lock: RawLock,
    worker_detach_lock: RawLock,
    attr: CompletionAttr,
}

impl BasicQueue {
    pub fn new() -> Self {
        Self::with_attr(CompletionAttr::default())
    }

    /// Same as [`BasicQueue::new`], additionally accepting the completion
    /// queue attribute object spec.md §6 lists as part of the external
    /// interface (stored only; see `sys::attr` module docs).
    pub fn with_attr(attr: CompletionAttr) -> Self {
        Self {
            items: List::new(),
            access_lock: RawLock::new(),
            worker_detach_lock: RawLock::new(),
            attr,
        }
    }

    pub fn attr(&self) -> &CompletionAttr {
        &self.attr
    }

    /// Blocking-acquire `access_lock`, returning a token proving it.
    pub fn lock(&self) -> QueueToken<'_> {
        self.access_lock.acquire();
        QueueToken { queue: self }
    }

    /// Non-blocking acquire of `access_lock`, used by the RWLock's
    /// `trywrlock` (spec.md §4.6 "Try-write"): never blocks, bounded steps.
    pub fn try_lock(&self) -> Option<QueueToken<'_>> {
        self.access_lock.try_acquire().ok().map(|()| QueueToken { queue: self })
    }

    /// Release `access_lock`. Consumes the token so it cannot be reused.
    pub fn unlock(&self, token: QueueToken<'_>) {
        debug_assert!(std::ptr::eq(token.queue, self));
        self.access_lock.release();
    }

    /// Append `item` at the tail. If `lock_hint` is absent, `access_lock`
    /// is acquired and released around the link. An item may be pre-started
    /// (see [`CompletionItem::start`]) before this call, in which case it is
    /// observable as in-progress immediately upon linking.
    pub fn enqueue(&self, item: &CompletionItem, lock_hint: Option<&QueueToken<'_>>) {
        let ptr = NonNull::from(item);
        match lock_hint {
            Some(token) => {
                debug_assert!(std::ptr::eq(token.queue, self));
                unsafe { self.items.push_back(ptr) };
            }
            None => {
                self.access_lock.acquire();
                unsafe { self.items.push_back(ptr) };
                self.access_lock.release();
            }
        }
    }

    /// Unlink `item`. Must be called with `access_lock` held.
    pub fn unsafe_dequeue(&self, item: &CompletionItem, token: &QueueToken<'_>) {
        debug_assert!(std::ptr::eq(token.queue, self));
        unsafe { self.items.unlink(NonNull::from(item)) };
    }

    /// Step 2+4 of the completion handshake (spec.md §4.2). Must be called
    /// with `access_lock` held (`token` proves it); the unlock always
    /// happens, even on the `SearchFailed` path. Fails with
    /// [`Error::SearchFailed`] if the item had already been finished (`wow`
    /// observed as null) at the start.
    pub fn unlock_and_wait(
        &self,
        item: &CompletionItem,
        waiter: &Waiter,
        token: QueueToken<'_>,
    ) -> Result<()> {
        debug_assert!(std::ptr::eq(token.queue, self));

        let wow = item.get_wow_relaxed();
        let worker_ptr = if item.is_null(wow) {
            log::debug!("mutexgear: unlock_and_wait found the item already finished");
            None
        } else {
            // Step 2: commit the waiter while still under access_lock.
            waiter.wait_detach_lock.acquire();
            item.set_wow_release(waiter as *const Waiter as *const ());
            Some(wow as *const Worker)
        };

        // The unlock always succeeds, unconditionally, regardless of outcome.
        self.access_lock.release();
        drop(token);

        let worker_ptr = match worker_ptr {
            Some(p) => p,
            None => return Err(Error::SearchFailed),
        };

        // SAFETY: the worker outlives this wait by construction of the
        // handshake (the worker only finishes dereferencing the waiter
        // after the waiter releases wait_detach_lock, below).
        let worker = unsafe { &*worker_ptr };
        self.wait_out_worker(item, waiter, worker);

        Ok(())
    }

    /// Step 4 of the completion handshake (spec.md §4.2), shared by
    /// `unlock_and_wait` and the cancelable queue's `unlock_and_cancel`:
    /// grip onto the worker's wheel, turn with it until `wow` is null,
    /// release the wheel, then complete the paired `worker_detach_lock`
    /// handshake. Must be called after the waiter's `wait_detach_lock` has
    /// already been acquired and `wow` published as the waiter (step 2).
    pub(crate) fn wait_out_worker(&self, item: &CompletionItem, waiter: &Waiter, worker: &Worker) {
        worker
            .wheel
            .grip_on()
            .unwrap_or_else(|e| error::abort_on_violation(&format!("grip_on failed: {e:?}")));
        while !item.is_null(item.get_wow_acquire()) {
            worker
                .wheel
                .turn()
                .unwrap_or_else(|e| error::abort_on_violation(&format!("turn failed: {e:?}")));
        }
        worker
            .wheel
            .release()
            .unwrap_or_else(|e| error::abort_on_violation(&format!("release failed: {e:?}")));

        waiter.wait_detach_lock.release();
        self.worker_detach_lock.acquire();
        self.worker_detach_lock.release();
    }

    /// Unlink `item` then run the finishing half of the handshake
    /// (spec.md §4.3 `safe_finish`). Leaves the item in as-init state.
    pub fn safe_finish(&self, item: &CompletionItem, worker: &Worker) {
        self.access_lock.acquire();
        self.unsafe_finish_locked(item);
        self.access_lock.release();
        self.unsafe_finish_unlocked(item, worker);
    }

    /// The locked half of `safe_finish`: just the unlink, exposed so
    /// composite operations (e.g. the RWLock's write release) can extend
    /// the critical section around it.
    pub fn unsafe_finish_locked(&self, item: &CompletionItem) {
        unsafe { self.items.unlink(NonNull::from(item)) };
    }

    /// The unlocked half of `safe_finish`: step 3 of the completion
    /// handshake (spec.md §4.2), run after `access_lock` has been released.
    pub fn unsafe_finish_unlocked(&self, item: &CompletionItem, worker: &Worker) {
        self.worker_detach_lock.acquire();

        let prior = item.get_wow_relaxed();
        item.set_null_release();
        worker
            .wheel
            .advance()
            .unwrap_or_else(|e| error::abort_on_violation(&format!("advance failed: {e:?}")));

        let worker_self = worker as *const Worker as *const ();
        if !item.is_null(prior) && prior != worker_self {
            // A waiter is attached: complete the paired handshake.
            let waiter = unsafe { &*(prior as *const Waiter) };
            waiter.wait_detach_lock.acquire();
            waiter.wait_detach_lock.release();
        }

        item.clear_tags();
        self.worker_detach_lock.release();
    }

    /// Forward iteration, safe on an unlocked, grow-only-at-the-tail queue
    /// per spec.md §4.3.
    pub fn iter(&self) -> Iter<'_, CompletionItem> {
        self.items.iter()
    }

    pub fn iter_rev(&self) -> IterRev<'_, CompletionItem> {
        self.items.iter_rev()
    }

    /// "Lock-or-default is-empty": checks emptiness using the caller's
    /// token if supplied, otherwise acquires and releases `access_lock`
    /// itself.
    pub fn lod_is_empty(&self, token: Option<&QueueToken<'_>>) -> bool {
        match token {
            Some(t) => {
                debug_assert!(std::ptr::eq(t.queue, self));
                self.items.is_empty()
            }
            None => {
                self.access_lock.acquire();
                let empty = self.items.is_empty();
                self.access_lock.release();
                empty
            }
        }
    }

    pub fn try_destroy(&self) -> Result<()> {
        if !self.items.is_empty() {
            return Err(Error::Busy);
        }
        self.access_lock.try_destroy()?;
        self.worker_detach_lock.try_destroy()?;
        Ok(())
    }
}

impl Default for BasicQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn enqueue_then_finish_returns_item_to_as_init() {
        let queue = BasicQueue::new();
        let worker = Worker::new();
        worker.start().unwrap();

        let item = CompletionItem::new();
        item.start(&worker as *const Worker as *const ());
        queue.enqueue(&item, None);

        queue.safe_finish(&item, &worker);
        assert!(item.is_as_init());
        worker.stop().unwrap();
    }

    #[test]
    fn waiter_unblocks_after_worker_finishes() {
        let queue = Arc::new(BasicQueue::new());
        let worker = Arc::new(Worker::new());
        worker.start().unwrap();

        let item = Arc::new(CompletionItem::new());
        item.start(Arc::as_ptr(&worker) as *const ());
        queue.enqueue(&item, None);

        let waiter = Arc::new(Waiter::new());
        let entered_wait = Arc::new(ManualEvent::new());

        let q2 = queue.clone();
        let item2 = item.clone();
        let waiter2 = waiter.clone();
        let entered2 = entered_wait.clone();
        let waiting = thread::spawn(move || {
            let token = q2.lock();
            entered2.set();
            q2.unlock_and_wait(&item2, &waiter2, token)
        });

        entered_wait.wait();
        queue.safe_finish(&item, &worker);

        waiting.join().unwrap().unwrap();
        assert!(item.is_as_init());
        worker.stop().unwrap();
    }

    #[test]
    fn unlock_and_wait_fails_if_already_finished() {
        let queue = BasicQueue::new();
        let worker = Worker::new();
        worker.start().unwrap();

        let item = CompletionItem::new();
        item.start(&worker as *const Worker as *const ());
        queue.enqueue(&item, None);
        queue.safe_finish(&item, &worker);
        assert!(item.is_as_init());

        let waiter = Waiter::new();
        let token = queue.lock();
        let result = queue.unlock_and_wait(&item, &waiter, token);
        assert_eq!(result, Err(Error::SearchFailed));
        worker.stop().unwrap();
    }
}
