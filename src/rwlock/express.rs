//! The express-reads stack: a lock-free LIFO readers append themselves to
//! on the fast path (spec.md §3, §4.6, §9).
//!
//! The eight bounded CAS retries below are a heuristic, not a correctness
//! requirement (spec.md §9): on exhaustion the caller falls back to the
//! `acquired_reads` access-lock path. The CAS is seq-cst so it pairs
//! reliably with the `express_commits` increment a committer performs
//! right after gathering a batch (spec.md §5) — that is the signal a
//! waiting writer uses to notice "did a reader slip in since I last
//! looked?".

use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::completion::CompletionItem;

const MAX_PUSH_RETRIES: usize = 8;

pub struct ExpressStack {
    head: AtomicPtr<CompletionItem>,
}

impl ExpressStack {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn is_empty_relaxed(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }

    /// Bounded lock-free push. Returns `false` if the bound was exhausted;
    /// the caller must then fall back to the access-lock commit path
    /// (spec.md §9 "Express stack correctness").
    pub fn try_push(&self, item: &CompletionItem) -> bool {
        let item_ptr = item as *const CompletionItem as *mut CompletionItem;
        let mut cur = self.head.load(Ordering::SeqCst);

        for _ in 0..MAX_PUSH_RETRIES {
            item.express_link_set(cur);
            match self
                .head
                .compare_exchange_weak(cur, item_ptr, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Atomically detach the whole stack and return it oldest-first
    /// (reversed from LIFO push order, spec.md §8 "Express-stack commit
    /// preserves reader order within a batch"). Must be called with the
    /// committer's lock held (`acquired_reads`'s access_lock) so no
    /// concurrent [`ExpressStack::remove`] races with it.
    pub fn take_all_oldest_first(&self) -> Vec<NonNull<CompletionItem>> {
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        let mut items = Vec::new();

        while let Some(p) = NonNull::new(cur) {
            items.push(p);
            cur = unsafe { p.as_ref() }.express_link_get();
        }
        items.reverse();
        items
    }

    /// Remove `item` from the stack if it is still on it. Must be called
    /// with `acquired_reads`'s access_lock held (spec.md §4.6 "read
    /// release" step 3), which serializes it against any concurrent commit.
    pub fn remove(&self, item: &CompletionItem) -> bool {
        let target = item as *const CompletionItem as *mut CompletionItem;
        let head = self.head.load(Ordering::Relaxed);

        if head == target {
            self.head.store(item.express_link_get(), Ordering::Relaxed);
            return true;
        }

        let mut cur = NonNull::new(head);
        while let Some(p) = cur {
            let next = unsafe { p.as_ref() }.express_link_get();
            if next == target {
                unsafe { p.as_ref() }.express_link_set(item.express_link_get());
                return true;
            }
            cur = NonNull::new(next);
        }
        false
    }
}

impl Default for ExpressStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_and_take_all_preserves_oldest_first_order() {
        let stack = ExpressStack::new();
        let a = CompletionItem::new();
        let b = CompletionItem::new();
        let c = CompletionItem::new();

        assert!(stack.try_push(&a));
        assert!(stack.try_push(&b));
        assert!(stack.try_push(&c));

        let items = stack.take_all_oldest_first();
        let ptrs: Vec<_> = items.iter().map(|p| p.as_ptr()).collect();
        assert_eq!(
            ptrs,
            vec![
                &a as *const _ as *mut CompletionItem,
                &b as *const _ as *mut CompletionItem,
                &c as *const _ as *mut CompletionItem,
            ]
        );
        assert!(stack.is_empty_relaxed());
    }

    #[test]
    fn remove_middle_item() {
        let stack = ExpressStack::new();
        let a = CompletionItem::new();
        let b = CompletionItem::new();
        let c = CompletionItem::new();
        stack.try_push(&a);
        stack.try_push(&b);
        stack.try_push(&c);

        assert!(stack.remove(&b));
        let items = stack.take_all_oldest_first();
        let ptrs: Vec<_> = items.iter().map(|p| p.as_ptr()).collect();
        assert_eq!(
            ptrs,
            vec![&a as *const _ as *mut CompletionItem, &c as *const _ as *mut CompletionItem]
        );
    }
}
