//! The drainable queue: a basic queue plus a monotonic drain epoch
//! (spec.md §3, §4.4). Used by `waiting_reads` so a released wait batch can
//! be swept off the queue in one splice instead of having every waiter walk
//! it individually (spec.md §4.6 "slow read path").

use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::list::List;
use crate::sys::CompletionAttr;

use super::item::CompletionItem;
use super::queue::{BasicQueue, QueueToken};
use super::role::{Waiter, Worker};

/// `drain_index` never takes this value; it is reserved to mean "no index
/// captured" (`MUTEXGEAR_COMPLETION_INVALID_DRAINIDX` in the original).
pub const INVALID_DRAIN_INDEX: u64 = 0;
const DRAIN_INDEX_MIN: u64 = 1;

fn increment_drain_index(index: u64) -> u64 {
    if index.wrapping_add(1) != INVALID_DRAIN_INDEX {
        index.wrapping_add(1)
    } else {
        DRAIN_INDEX_MIN
    }
}

/// A side list that items get bulk-moved onto by [`DrainableQueue::safe_drain`].
/// Plain `List`, distinguished from `BasicQueue` only by not itself carrying
/// an access lock: whoever drains into it is assumed to already hold
/// whatever lock protects the drain target, matching the original's
/// `mutexgear_completion_drain_t` (a bare list, no mutex of its own).
pub struct Drain {
    pub(crate) items: List<CompletionItem>,
    attr: CompletionAttr,
}

impl Drain {
    pub fn new() -> Self {
        Self::with_attr(CompletionAttr::default())
    }

    /// Same as [`Drain::new`], additionally accepting the completion
    /// attribute object (stored only; see `sys::attr` module docs).
    pub fn with_attr(attr: CompletionAttr) -> Self {
        Self {
            items: List::new(),
            attr,
        }
    }

    pub fn attr(&self) -> &CompletionAttr {
        &self.attr
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn try_destroy(&self) -> Result<()> {
        if !self.items.is_empty() {
            return Err(Error::Busy);
        }
        Ok(())
    }
}

impl Default for Drain {
    fn default() -> Self {
        Self::new()
    }
}

/// Basic queue + monotonic `drain_index` (spec.md §4.4).
pub struct DrainableQueue {
    pub(crate) basic: BasicQueue,
    drain_index: std::cell::Cell<u64>,
}

// SAFETY: `drain_index` is only ever read/written with `basic`'s access_lock
// held (see every method below), so the `Cell` never races.
unsafe impl Sync for DrainableQueue {}

impl DrainableQueue {
    pub fn new() -> Self {
        Self::with_attr(CompletionAttr::default())
    }

    /// Same as [`DrainableQueue::new`], additionally accepting the
    /// completion attribute object, forwarded into the inner [`BasicQueue`].
    pub fn with_attr(attr: CompletionAttr) -> Self {
        Self {
            basic: BasicQueue::with_attr(attr),
            drain_index: std::cell::Cell::new(DRAIN_INDEX_MIN),
        }
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

    /// Current drain index, read under the caller's token or a fresh lock.
    pub fn get_index(&self, token: Option<&QueueToken<'_>>) -> u64 {
        match token {
            Some(_) => self.drain_index.get(),
            None => {
                let t = self.basic.lock();
                let idx = self.drain_index.get();
                self.basic.unlock(t);
                idx
            }
        }
    }

    /// Append `item`, optionally returning the drain index that was current
    /// at the moment of linking (the index the caller should later present
    /// to `safe_drain` to recognize a since-happened drain).
    pub fn enqueue_with_index(&self, item: &CompletionItem, token: Option<&QueueToken<'_>>) -> u64 {
        match token {
            Some(t) => {
                self.basic.enqueue(item, Some(t));
                self.drain_index.get()
            }
            None => {
                let t = self.basic.lock();
                self.basic.enqueue(item, Some(&t));
                let idx = self.drain_index.get();
                self.basic.unlock(t);
                idx
            }
        }
    }

    pub fn enqueue(&self, item: &CompletionItem, token: Option<&QueueToken<'_>>) {
        self.basic.enqueue(item, token);
    }

    pub fn unsafe_dequeue(&self, item: &CompletionItem, token: &QueueToken<'_>) {
        self.basic.unsafe_dequeue(item, token)
    }

    pub fn unlock_and_wait(&self, item: &CompletionItem, waiter: &Waiter, token: QueueToken<'_>) -> Result<()> {
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

    /// Splice the suffix starting at `head_item` onto `target`'s tail, iff
    /// either `head_item` is currently the actual head of this queue, or
    /// `item_index` equals the index currently in effect (meaning no drain
    /// has happened since that index was captured). Must be called with
    /// `access_lock` held. Returns whether the drain actually executed; a
    /// mismatch is silently ignored per spec.md §4.4, not an error.
    pub fn safe_drain(
        &self,
        head_item: &CompletionItem,
        item_index: u64,
        target: &Drain,
        token: &QueueToken<'_>,
    ) -> bool {
        let _ = token;
        let head_ptr = self.basic.items.head();
        let is_current_head = head_ptr == Some(NonNull::from(head_item));

        if is_current_head || item_index == self.drain_index.get() {
            unsafe { self.basic.items.splice_suffix_to(NonNull::from(head_item), &target.items) };
            self.drain_index.set(increment_drain_index(self.drain_index.get()));
            true
        } else {
            false
        }
    }

    pub fn try_destroy(&self) -> Result<()> {
        self.basic.try_destroy()
    }
}

impl Default for DrainableQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drain_index_starts_at_min_and_is_monotonic() {
        let queue = DrainableQueue::new();
        assert_eq!(queue.get_index(None), DRAIN_INDEX_MIN);

        let a = CompletionItem::new();
        let b = CompletionItem::new();
        let token = queue.lock();
        queue.enqueue(&a, Some(&token));
        let idx_a = queue.get_index(Some(&token));
        queue.enqueue(&b, Some(&token));

        let drain = Drain::new();
        let executed = queue.safe_drain(&a, idx_a, &drain, &token);
        assert!(executed);
        assert_eq!(queue.get_index(Some(&token)), DRAIN_INDEX_MIN + 1);
        queue.unlock(token);

        assert!(!drain.is_empty());
    }

    #[test]
    fn stale_index_and_non_head_item_is_ignored() {
        let queue = DrainableQueue::new();
        let a = CompletionItem::new();
        let b = CompletionItem::new();
        let token = queue.lock();
        queue.enqueue(&a, Some(&token));
        queue.enqueue(&b, Some(&token));

        let drain = Drain::new();
        // `b` is not the head, and the stale index 0 never matches.
        let executed = queue.safe_drain(&b, INVALID_DRAIN_INDEX, &drain, &token);
        assert!(!executed);
        queue.unlock(token);
        assert!(drain.is_empty());
    }

    #[test]
    fn drain_index_wraps_skipping_zero() {
        assert_eq!(increment_drain_index(u64::MAX), DRAIN_INDEX_MIN);
    }
}
