//! The cancelable queue: a basic queue with a cooperative cancel protocol
//! (spec.md §3, §4.5).

use crate::error::abort_on_violation;
use crate::sys::CompletionAttr;
#[cfg(test)]
use crate::sys::ManualEvent;

use super::item::CompletionItem;
use super::queue::{BasicQueue, QueueToken};
use super::role::{Waiter, Worker};

/// Who owns `item` after [`CancelableQueue::unlock_and_cancel`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No worker had been assigned yet; the item was unlinked and is back
    /// in the caller's hands to free or recycle.
    Owner,
    /// A worker was already processing the item; it will finish and
    /// recycle the item itself. The caller must not touch it further.
    NotOwner,
}

/// Basic queue + a `cancel_requested` tag and cooperative abort protocol
/// (spec.md §4.5). Identical surface to [`super::BasicQueue`] plus
/// `unlock_and_cancel`/`is_canceled`.
pub struct CancelableQueue {
    basic: BasicQueue,
}

impl CancelableQueue {
    pub fn new() -> Self {
        Self::with_attr(CompletionAttr::default())
    }

    /// Same as [`CancelableQueue::new`], additionally accepting the
    /// completion attribute object, forwarded into the inner [`BasicQueue`].
    pub fn with_attr(attr: CompletionAttr) -> Self {
        Self { basic: BasicQueue::with_attr(attr) }
    }

    pub fn attr(&self) -> &CompletionAttr {
        self.basic.attr()
    }

    pub fn lock(&self) -> QueueToken<'_> {
        self.basic.lock()
    }

    pub fn unlock(&self, token: QueueToken<'_>) {
        self.basic.unlock(token)
    }

    pub fn enqueue(&self, item: &CompletionItem, token: Option<&QueueToken<'_>>) {
        self.basic.enqueue(item, token)
    }

    pub fn unsafe_dequeue(&self, item: &CompletionItem, token: &QueueToken<'_>) {
        self.basic.unsafe_dequeue(item, token)
    }

    pub fn unlock_and_wait(&self, item: &CompletionItem, waiter: &Waiter, token: QueueToken<'_>) -> crate::error::Result<()> {
        self.basic.unlock_and_wait(item, waiter, token)
    }

    pub fn safe_finish(&self, item: &CompletionItem, worker: &Worker) {
        self.basic.safe_finish(item, worker)
    }

    pub fn lod_is_empty(&self, token: Option<&QueueToken<'_>>) -> bool {
        self.basic.lod_is_empty(token)
    }

    pub fn iter(&self) -> crate::list::Iter<'_, CompletionItem> {
        self.basic.iter()
    }

    pub fn iter_rev(&self) -> crate::list::IterRev<'_, CompletionItem> {
        self.basic.iter_rev()
    }

    pub fn try_destroy(&self) -> crate::error::Result<()> {
        self.basic.try_destroy()
    }

    /// Cancel `item` on behalf of `waiter`, consuming the caller's access
    /// lock token (spec.md §4.5). If no worker has been assigned yet, the
    /// item is unlinked and ownership returns to the caller. Otherwise the
    /// `cancel_requested` tag and the waiter are published under the access
    /// lock, the lock is released, `cancel_cb` (if given) is invoked to let
    /// the caller nudge the worker out of whatever external wait it may be
    /// in, and the waiter then runs the normal completion handshake — the
    /// caller never owns the item on this branch; the worker recycles it.
    pub fn unlock_and_cancel<F>(
        &self,
        item: &CompletionItem,
        waiter: &Waiter,
        token: QueueToken<'_>,
        cancel_cb: Option<F>,
    ) -> Ownership
    where
        F: FnOnce(&Worker),
    {
        let wow = item.get_wow_relaxed();

        if item.is_null(wow) {
            self.basic.unsafe_dequeue(item, &token);
            self.basic.unlock(token);
            return Ownership::Owner;
        }

        waiter.wait_detach_lock.acquire();
        item.set_cancel_requested();
        item.set_wow_release(waiter as *const Waiter as *const ());
        self.basic.unlock(token);

        // SAFETY: `wow` decoded to a live worker pointer at the moment the
        // access lock was held and a waiter has just been committed onto
        // the item, so the worker cannot finish dereferencing us until the
        // handshake below releases `wait_detach_lock`.
        let worker = unsafe { &*(wow as *const Worker) };
        if let Some(cb) = cancel_cb {
            cb(worker);
        }

        self.basic.wait_out_worker(item, waiter, worker);
        Ownership::NotOwner
    }

    /// Worker-side poll (spec.md §4.5): reads `wow` relaxed; if it still
    /// names `worker`, no cancel has been requested. Otherwise re-reads
    /// with acquire order (to observe the tag write that accompanied the
    /// waiter's publish) and returns the cancel tag.
    pub fn is_canceled(item: &CompletionItem, worker: &Worker) -> bool {
        let worker_ptr = worker as *const Worker as *const ();
        let current = item.get_wow_relaxed();

        if current == worker_ptr {
            return false;
        }

        let recheck = item.get_wow_acquire();
        if recheck != current {
            abort_on_violation("item wow changed between relaxed and acquire re-read during is_canceled");
        }
        item.cancel_requested()
    }
}

impl Default for CancelableQueue {
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
    fn cancel_before_start_returns_ownership_to_caller() {
        let queue = CancelableQueue::new();
        let item = CompletionItem::new();
        queue.enqueue(&item, None);

        let waiter = Waiter::new();
        let token = queue.lock();
        let ownership = queue.unlock_and_cancel::<fn(&Worker)>(&item, &waiter, token, None);
        assert_eq!(ownership, Ownership::Owner);
        assert!(crate::list::is_unlinked(&item));
    }

    #[test]
    fn cancel_after_start_hands_off_to_worker() {
        let queue = Arc::new(CancelableQueue::new());
        let worker = Arc::new(Worker::new());
        worker.start().unwrap();

        let item = Arc::new(CompletionItem::new());
        item.start(Arc::as_ptr(&worker) as *const ());
        queue.enqueue(&item, None);

        let waiter = Arc::new(Waiter::new());
        let entered_cancel = Arc::new(ManualEvent::new());

        let q2 = queue.clone();
        let item2 = item.clone();
        let waiter2 = waiter.clone();
        let entered2 = entered_cancel.clone();
        let canceling = thread::spawn(move || {
            let token = q2.lock();
            // The cancel callback runs after `CANCEL_REQUESTED` is set and
            // the access lock released, right before blocking on the
            // worker — the first point at which `is_canceled` is
            // guaranteed to observe the request.
            q2.unlock_and_cancel(&item2, &waiter2, token, Some(|_: &Worker| entered2.set()))
        });

        entered_cancel.wait();
        assert!(CancelableQueue::is_canceled(&item, &worker));
        queue.safe_finish(&item, &worker);

        assert_eq!(canceling.join().unwrap(), Ownership::NotOwner);
        assert!(item.is_as_init());
        worker.stop().unwrap();
    }

    #[test]
    fn is_canceled_false_before_cancel_requested() {
        let worker = Worker::new();
        worker.start().unwrap();
        let item = CompletionItem::new();
        item.start(&worker as *const Worker as *const ());
        assert!(!CancelableQueue::is_canceled(&item, &worker));
        worker.stop().unwrap();
    }
}
