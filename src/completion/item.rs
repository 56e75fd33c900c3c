//! The completion item (spec.md §3, §4.2, §9).
//!
//! `wow` ("worker or waiter") is stored as a byte offset relative to the
//! item's own address: a value of zero decodes back to the item itself and
//! is the reserved null sentinel no real worker or waiter can ever occupy,
//! since neither role lives inside the item (spec.md §9). `extra` packs a
//! small set of tag bits upper layers use to mark state.

use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicU32, Ordering};

use crate::list::{Link, Linked};
use crate::sys::atomic::{decode_offset, encode_offset};

// The self-relative offset trick (spec.md §9) assumes a pointer and an
// `isize` byte offset round-trip losslessly on this target.
static_assertions::const_assert_eq!(std::mem::size_of::<isize>(), std::mem::size_of::<*const ()>());

/// Set by a cancelable queue's `unlock_and_cancel` before publishing the
/// waiter, polled by the worker via [`CompletionItem::is_canceled`].
pub const CANCEL_REQUESTED: u32 = 1 << 31;
/// Set by a writer claiming a reader item during its tail-scan so other
/// concurrent writers pick different readers (spec.md §4.6 "write
/// acquisition" step 4).
pub const BEING_WAITED: u32 = 1 << 30;
/// Marks the TRDL extension's permanent `tryread_queue_separator` (spec.md
/// §4.6 TRDL extension): a tail-scan skips it rather than waiting on it, and
/// it alone left in `acquired_reads` still counts as "lock unheld".
pub const TRDL_SEPARATOR: u32 = 1 << 29;

/// A node linkable into at most one queue at a time, whose `wow` field
/// identifies its current worker, waiter, or null (spec.md glossary).
pub struct CompletionItem {
    link: Link<CompletionItem>,
    wow: AtomicIsize,
    extra: AtomicU32,
    /// Singly-linked chain pointer reserved for the RWLock's lock-free
    /// express-reads stack (spec.md §3, §4.6). Kept as a dedicated atomic
    /// rather than repurposing `link`'s `prev` cell: the express stack is
    /// mutated by a bare CAS with no access_lock held, while `link` is only
    /// ever touched under a queue's access_lock, and racing a `Cell` write
    /// against a lock-free CAS would be unsound. Unused outside `rwlock`.
    express_link: AtomicPtr<CompletionItem>,
}

impl CompletionItem {
    pub fn new() -> Self {
        // NOTE: the link fields start as `None`, which `list::is_unlinked`
        // treats the same as the self-cycle sentinel. We cannot take this
        // item's address yet to write a literal self-pointer: `self` here
        // is a temporary that the caller is about to move into place.
        Self {
            link: Link::new(),
            wow: AtomicIsize::new(0),
            extra: AtomicU32::new(0),
            express_link: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn self_addr(&self) -> *const () {
        self as *const CompletionItem as *const ()
    }

    /// Re-initialize an item back to as-init state. Only valid when the
    /// item is currently unlinked (caller's responsibility, as with the
    /// original's `reinit`).
    pub fn reinit(&self) {
        self.wow.store(0, Ordering::Relaxed);
        self.extra.store(0, Ordering::Relaxed);
        crate::list::reset_to_unlinked(self);
    }

    /// An item is "as-init" when unlinked and `wow` decodes to null
    /// (spec.md §3).
    pub fn is_as_init(&self) -> bool {
        crate::list::is_unlinked(self) && self.is_null_relaxed()
    }

    // -- wow --------------------------------------------------------------

    /// Pre-start / start transition (spec.md §4.2 step 1): `null -> W`.
    /// A plain store; must happen-before the item is observable as
    /// in-progress (i.e. before it is linked into a queue other threads can
    /// see).
    pub fn start(&self, worker: *const ()) {
        self.wow.store(encode_offset(self.self_addr(), worker), Ordering::Relaxed);
    }

    pub fn get_wow_relaxed(&self) -> *const () {
        unsafe { decode_offset(self.self_addr(), self.wow.load(Ordering::Relaxed)) }
    }

    pub fn get_wow_acquire(&self) -> *const () {
        unsafe { decode_offset(self.self_addr(), self.wow.load(Ordering::Acquire)) }
    }

    pub fn set_wow_release(&self, target: *const ()) {
        self.wow
            .store(encode_offset(self.self_addr(), target), Ordering::Release);
    }

    pub fn set_null_release(&self) {
        self.wow.store(0, Ordering::Release);
    }

    pub fn is_null(&self, ptr: *const ()) -> bool {
        ptr == self.self_addr()
    }

    pub fn is_null_relaxed(&self) -> bool {
        self.is_null(self.get_wow_relaxed())
    }

    // -- extra tags ---------------------------------------------------------

    pub fn set_cancel_requested(&self) {
        self.extra.fetch_or(CANCEL_REQUESTED, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.extra.load(Ordering::Acquire) & CANCEL_REQUESTED != 0
    }

    /// Claim the item for a writer's tail-scan. Returns `true` if this call
    /// performed the claim (the tag was previously clear).
    pub fn try_mark_being_waited(&self) -> bool {
        self.extra.fetch_or(BEING_WAITED, Ordering::AcqRel) & BEING_WAITED == 0
    }

    pub fn clear_being_waited(&self) {
        self.extra.fetch_and(!BEING_WAITED, Ordering::Release);
    }

    pub fn being_waited(&self) -> bool {
        self.extra.load(Ordering::Acquire) & BEING_WAITED != 0
    }

    pub(crate) fn clear_tags(&self) {
        self.extra.store(0, Ordering::Relaxed);
    }

    /// Permanently tag this item as the TRDL separator. Only ever called
    /// once, right after construction, before the item is linked anywhere.
    pub(crate) fn mark_trdl_separator(&self) {
        self.extra.fetch_or(TRDL_SEPARATOR, Ordering::Relaxed);
    }

    pub(crate) fn is_trdl_separator(&self) -> bool {
        self.extra.load(Ordering::Relaxed) & TRDL_SEPARATOR != 0
    }

    // -- express-stack linkage (rwlock-only) -------------------------------

    pub(crate) fn express_link_get(&self) -> *mut CompletionItem {
        self.express_link.load(Ordering::Relaxed)
    }

    pub(crate) fn express_link_set(&self, next: *mut CompletionItem) {
        self.express_link.store(next, Ordering::Relaxed);
    }
}

impl Default for CompletionItem {
    fn default() -> Self {
        Self::new()
    }
}

impl Linked for CompletionItem {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

// SAFETY: every mutable access to the linkage and the tag bits is
// serialized by the owning queue's access_lock (or performed through the
// atomics above); `wow` itself is always accessed atomically.
unsafe impl Send for CompletionItem {}
unsafe impl Sync for CompletionItem {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_item_is_as_init() {
        let item = CompletionItem::new();
        assert!(item.is_as_init());
    }

    #[test]
    fn start_then_null_round_trips() {
        let item = CompletionItem::new();
        let marker: u8 = 0;
        let worker_ptr = &marker as *const u8 as *const ();
        item.start(worker_ptr);
        assert!(!item.is_null_relaxed());
        assert_eq!(item.get_wow_relaxed(), worker_ptr);

        item.set_null_release();
        assert!(item.is_null_relaxed());
    }

    #[test]
    fn being_waited_claims_exactly_once() {
        let item = CompletionItem::new();
        assert!(item.try_mark_being_waited());
        assert!(!item.try_mark_being_waited());
        item.clear_being_waited();
        assert!(item.try_mark_being_waited());
    }
}
