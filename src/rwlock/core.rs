//! The RWLock core (spec.md §3 "RWLock (basic)", §4.6).
//!
//! Composes one basic queue of currently-held read items (`acquired_reads`),
//! one basic queue of announced writers (`waiting_writes`), one drainable
//! queue of readers queued behind a writer (`waiting_reads`), a bare drain
//! target (`read_wait_drain`), the lock-free express-reads stack, and the
//! reader-push locks a writer uses to bound its tail-scan. See DESIGN.md for
//! the resolution of the §2/§3 "is `acquired_reads` basic or drainable?"
//! inconsistency in spec.md (this crate follows §3's detailed description:
//! basic).

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::completion::{BasicQueue, CompletionItem, Drain, DrainableQueue, QueueToken, Waiter, Worker};
use crate::error::{abort_on_violation, AllMarkedSentinel, Error, Result};
use crate::list;
use crate::sys::RwLockAttr;

use super::express::ExpressStack;
use super::pushlocks::{ChannelCount, ExpressCommitsWatch, ReaderPushLocks};

/// Bounded number of spins a writer gives a waiting-readers-promotion
/// admission window to be claimed before closing it (spec.md §4.6 "WP",
/// §9 "the source keeps it on the writer's stack" — there is no explicit
/// bound named in spec.md for *how long* the window stays open, so this
/// crate picks a small fixed spin count rather than a real-time sleep, to
/// keep `wrlock` free of wall-clock dependencies).
const WP_ADMISSION_SPINS: usize = 64;

/// `readers_till_wp` (spec.md §4.6 "Waiting-readers promotion"). Per-call,
/// not per-lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingReadersPromotion {
    /// N = 0: push locks are acquired right away, no extra readers admitted.
    Immediate,
    /// N > 0: up to `N` subsequent readers may still take the fast path
    /// before the writer starts its push-lock/tail-scan dance.
    Bounded(u32),
    /// The distinguished "infinite" code (spec.md §9: "a distinguished
    /// code, not a very large number"): WP is disabled, the writer never
    /// forces readers onto the slow path, and it tail-scans without ever
    /// taking reader-push locks.
    Infinite,
}

impl Default for WaitingReadersPromotion {
    fn default() -> Self {
        WaitingReadersPromotion::Immediate
    }
}

struct ReadNode {
    item: CompletionItem,
    worker: Worker,
    waiter: Waiter,
}

struct WriteNode {
    item: CompletionItem,
    worker: Worker,
    waiter: Waiter,
}

/// Opaque read-held token returned by [`RwLockCore::rdlock`], consumed by
/// [`RwLockCore::rdunlock`]. Boxed so the item/worker/waiter triple has a
/// stable address for as long as the read is held, independent of where
/// the token itself is stored.
pub struct ReadToken {
    node: Box<ReadNode>,
}

/// Opaque write-held token. `node` is `None` on the fast (uncontended) path,
/// where the writer never had to announce itself in `waiting_writes`.
pub struct WriteToken<'a> {
    token: QueueToken<'a>,
    node: Option<Box<WriteNode>>,
}

enum WaitAllOutcome<'a> {
    Done(QueueToken<'a>),
    Continue,
    AllMarked(AllMarkedSentinel),
}

pub struct RwLockCore {
    pub(super) acquired_reads: BasicQueue,
    waiting_writes: BasicQueue,
    waiting_reads: DrainableQueue,
    read_wait_drain: Drain,
    express: ExpressStack,
    express_commits: AtomicU64,
    wp_budget: AtomicI64,
    push_locks: ReaderPushLocks,
    attr: RwLockAttr,
}

impl RwLockCore {
    pub fn new(channels: ChannelCount) -> Self {
        Self::with_attr(RwLockAttr::default(), channels)
    }

    /// Same as [`RwLockCore::new`], additionally accepting the rwlock
    /// attribute object spec.md §6 lists as part of the external interface
    /// (stored only; see `sys::attr` module docs).
    pub fn with_attr(attr: RwLockAttr, channels: ChannelCount) -> Self {
        Self {
            acquired_reads: BasicQueue::new(),
            waiting_writes: BasicQueue::new(),
            waiting_reads: DrainableQueue::new(),
            read_wait_drain: Drain::new(),
            express: ExpressStack::new(),
            express_commits: AtomicU64::new(0),
            wp_budget: AtomicI64::new(0),
            push_locks: ReaderPushLocks::new(channels),
            attr,
        }
    }

    pub fn attr(&self) -> &RwLockAttr {
        &self.attr
    }

    /// Flush the express stack into `acquired_reads`'s tail, oldest first,
    /// and bump `express_commits`. Must be called with `acquired_reads`'s
    /// access_lock held (spec.md §4.6 "Express-stack commit").
    fn commit_express_locked(&self, _token: &QueueToken<'_>) {
        let items = self.express.take_all_oldest_first();
        if items.is_empty() {
            return;
        }
        for p in items {
            unsafe { self.acquired_reads.items.push_back(p) };
        }
        self.express_commits.fetch_add(1, Ordering::SeqCst);
    }

    /// Spec.md §4.6 read-acquisition step 1's gate: `waiting_writes` empty,
    /// or a waiting-readers-promotion admission budget is still open.
    fn admit_fast_path(&self) -> bool {
        if self.waiting_writes.lod_is_empty(None) {
            return true;
        }
        loop {
            let budget = self.wp_budget.load(Ordering::SeqCst);
            if budget <= 0 {
                return false;
            }
            if budget == i64::MAX {
                return true;
            }
            if self
                .wp_budget
                .compare_exchange_weak(budget, budget - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    // -- read acquisition / release ----------------------------------------

    /// Spec.md §4.6 "Read acquisition".
    pub fn rdlock(&self) -> ReadToken {
        let node = Box::new(ReadNode {
            item: CompletionItem::new(),
            worker: Worker::new(),
            waiter: Waiter::new(),
        });
        node.worker
            .start()
            .unwrap_or_else(|e| abort_on_violation(&format!("reader worker start failed: {e:?}")));
        let worker_ptr = &node.worker as *const Worker as *const ();
        node.item.start(worker_ptr);

        let mut on_express = false;
        if self.admit_fast_path() && self.express.try_push(&node.item) {
            on_express = true;
            // Spec.md §4.6 step 1's "subsequent check": a writer that finds
            // `acquired_reads` empty takes the fast, uncontended path and
            // then holds its access_lock for the whole write, without ever
            // touching the express stack. A bare CAS push races against that
            // transition, so before trusting it we peek at `acquired_reads`
            // (racy, unlocked, same spirit as the original's end-item
            // neighbor-pointer recheck): if it still looks non-empty, no
            // such transition could have completed, and the push is good.
            if !self.acquired_reads.items.is_empty() {
                return ReadToken { node };
            }
        }

        let token = self.acquired_reads.lock();
        if self.waiting_writes.lod_is_empty(None) {
            // Picks our own item up too if it is still sitting on the
            // express stack from the check above.
            self.commit_express_locked(&token);
            if !on_express {
                self.acquired_reads.enqueue(&node.item, Some(&token));
            }
            self.acquired_reads.unlock(token);
            return ReadToken { node };
        }
        if on_express {
            if !list::is_unlinked(&node.item) {
                // A concurrent commit already won the race and linked our
                // item into `acquired_reads` while no writer was present
                // yet — that read was validly granted before the writer we
                // just observed ever registered. Nothing left to do.
                self.acquired_reads.unlock(token);
                return ReadToken { node };
            }
            // Still only on the express stack: pull it back off before
            // routing it through `waiting_reads` — both lists reuse the
            // same `link` field, so the item cannot be on both at once.
            self.express.remove(&node.item);
        }
        self.acquired_reads.unlock(token);

        self.read_slow_path(&node);
        ReadToken { node }
    }

    /// Spec.md §4.6 "Slow read path".
    fn read_slow_path(&self, node: &ReadNode) {
        loop {
            let token = self.waiting_reads.lock();
            let preceding = self.waiting_reads.basic.items.tail();
            let my_index = self.waiting_reads.enqueue_with_index(&node.item, Some(&token));

            // `preceding` is read and waited-on without ever releasing
            // `waiting_reads`'s access_lock in between: the item is only
            // ever unlinked (by its own finish, or by a drain) under that
            // same lock, so holding it continuously is what keeps the
            // pointer from dangling out from under us.
            let drained = match preceding {
                None => {
                    self.waiting_reads.unlock(token);
                    self.drain_waiting_writes_for(&node.waiter);

                    let dtoken = self.waiting_reads.lock();
                    let drained = self
                        .waiting_reads
                        .safe_drain(&node.item, my_index, &self.read_wait_drain, &dtoken);
                    self.waiting_reads.unlock(dtoken);
                    drained
                }
                Some(preceding_ptr) => {
                    // SAFETY: still linked in `waiting_reads` under the lock
                    // we are about to hand to `unlock_and_wait`.
                    let preceding_item = unsafe { preceding_ptr.as_ref() };
                    match self.waiting_reads.unlock_and_wait(preceding_item, &node.waiter, token) {
                        Ok(()) | Err(Error::SearchFailed) => {}
                        Err(e) => abort_on_violation(&format!("read_slow_path unlock_and_wait: {e:?}")),
                    }
                    false
                }
            };

            self.finish_waiting_reads_item(&node.item, &node.worker, drained);

            let atoken = self.acquired_reads.lock();
            if self.waiting_writes.lod_is_empty(None) {
                self.commit_express_locked(&atoken);
                self.acquired_reads.enqueue(&node.item, Some(&atoken));
                self.acquired_reads.unlock(atoken);
                return;
            }
            self.acquired_reads.unlock(atoken);
            // A writer is (still/again) present: loop and re-register.
        }
    }

    /// Wait out every currently-queued writer, head-first, one at a time
    /// (spec.md §4.6 step 2 of the slow path: "this releases writers
    /// one-at-a-time").
    fn drain_waiting_writes_for(&self, waiter: &Waiter) {
        loop {
            let token = self.waiting_writes.lock();
            if self.waiting_writes.lod_is_empty(Some(&token)) {
                self.waiting_writes.unlock(token);
                return;
            }
            // SAFETY: the head is linked under the access_lock we hold.
            let head = unsafe { self.waiting_writes.items.head().unwrap().as_ref() };
            match self.waiting_writes.unlock_and_wait(head, waiter, token) {
                Ok(()) | Err(Error::SearchFailed) => continue,
                Err(e) => abort_on_violation(&format!("drain_waiting_writes_for: {e:?}")),
            }
        }
    }

    /// Unlink `item` from whichever list currently holds it (`waiting_reads`
    /// if the bulk drain didn't run, `read_wait_drain` if it did) and run
    /// the unlocked half of the completion handshake, waking whichever
    /// reader is waiting immediately behind it, if any.
    fn finish_waiting_reads_item(&self, item: &CompletionItem, worker: &Worker, drained: bool) {
        if drained {
            unsafe { self.read_wait_drain.items.unlink(NonNull::from(item)) };
        } else {
            let token = self.waiting_reads.lock();
            self.waiting_reads.unsafe_dequeue(item, &token);
            self.waiting_reads.unlock(token);
        }
        self.waiting_reads.basic.unsafe_finish_unlocked(item, worker);
    }

    /// Spec.md §4.6 "Read release".
    pub fn rdunlock(&self, token: ReadToken) {
        let ReadToken { node } = token;
        let qtoken = self.acquired_reads.lock();

        if !list::is_unlinked(&node.item) {
            self.acquired_reads.unsafe_finish_locked(&node.item);
            self.commit_express_locked(&qtoken);
            self.acquired_reads.unlock(qtoken);
            self.acquired_reads.unsafe_finish_unlocked(&node.item, &node.worker);
        } else {
            self.express.remove(&node.item);
            self.commit_express_locked(&qtoken);
            self.acquired_reads.unlock(qtoken);
            node.item.reinit();
        }

        node.worker
            .stop()
            .unwrap_or_else(|e| abort_on_violation(&format!("reader worker stop failed: {e:?}")));
    }

    /// A lock is unheld when `acquired_reads` is empty, or (TRDL extension)
    /// contains only the permanent `tryread_queue_separator` (spec.md §4.6
    /// "A writer arriving while `acquired_reads` contains only the TRDL
    /// separator treats the lock as unheld"). Must be called with
    /// `acquired_reads`'s access_lock held.
    fn is_held_locked(&self, token: &QueueToken<'_>) -> bool {
        let _ = token;
        match (self.acquired_reads.items.head(), self.acquired_reads.items.tail()) {
            (Some(h), Some(t)) if h == t => !unsafe { h.as_ref() }.is_trdl_separator(),
            (Some(_), Some(_)) => true,
            _ => false,
        }
    }

    // -- write acquisition / release ----------------------------------------

    /// Spec.md §4.6 "Write acquisition".
    pub fn wrlock(&self, wp: WaitingReadersPromotion) -> WriteToken<'_> {
        let token = self.acquired_reads.lock();
        if !self.is_held_locked(&token) {
            return WriteToken { token, node: None };
        }
        self.acquired_reads.unlock(token);

        let node = Box::new(WriteNode {
            item: CompletionItem::new(),
            worker: Worker::new(),
            waiter: Waiter::new(),
        });
        node.worker
            .start()
            .unwrap_or_else(|e| abort_on_violation(&format!("writer worker start failed: {e:?}")));
        let worker_ptr = &node.worker as *const Worker as *const ();
        node.item.start(worker_ptr);
        self.waiting_writes.enqueue(&node.item, None);

        let infinite = matches!(wp, WaitingReadersPromotion::Infinite);
        self.open_wp_window(wp);

        let held_token = if infinite {
            self.wait_out_readers_no_push_locks(&node.waiter)
        } else {
            self.wait_out_readers_with_push_locks(&node.waiter)
        };

        // Step 5: finish W out of waiting_writes (wakes the next writer, if
        // any), keeping `acquired_reads` locked as the write-held state.
        self.waiting_writes.safe_finish(&node.item, &node.worker);
        node.worker
            .stop()
            .unwrap_or_else(|e| abort_on_violation(&format!("writer worker stop failed: {e:?}")));

        WriteToken {
            token: held_token,
            node: Some(node),
        }
    }

    fn open_wp_window(&self, wp: WaitingReadersPromotion) {
        match wp {
            WaitingReadersPromotion::Immediate => {}
            WaitingReadersPromotion::Bounded(0) => {}
            WaitingReadersPromotion::Bounded(n) => {
                self.wp_budget.fetch_add(n as i64, Ordering::SeqCst);
                for _ in 0..WP_ADMISSION_SPINS {
                    if self.wp_budget.load(Ordering::SeqCst) <= 0 {
                        break;
                    }
                    std::thread::yield_now();
                }
                self.wp_budget.store(0, Ordering::SeqCst);
            }
            WaitingReadersPromotion::Infinite => {
                self.wp_budget.store(i64::MAX, Ordering::SeqCst);
            }
        }
    }

    fn mark_next_unwaited_reader(&self) -> Option<NonNull<CompletionItem>> {
        for p in self.acquired_reads.iter_rev() {
            let it = unsafe { p.as_ref() };
            if it.is_trdl_separator() {
                continue;
            }
            if it.try_mark_being_waited() {
                return Some(p);
            }
        }
        None
    }

    fn try_wait_all_current_readers<'a>(
        &'a self,
        token: QueueToken<'a>,
        waiter: &Waiter,
    ) -> WaitAllOutcome<'a> {
        if !self.is_held_locked(&token) {
            return WaitAllOutcome::Done(token);
        }

        match self.mark_next_unwaited_reader() {
            None => {
                self.acquired_reads.unlock(token);
                WaitAllOutcome::AllMarked(AllMarkedSentinel)
            }
            Some(reader_ptr) => {
                let reader_item = unsafe { reader_ptr.as_ref() };
                match self.acquired_reads.unlock_and_wait(reader_item, waiter, token) {
                    Ok(()) | Err(Error::SearchFailed) => WaitAllOutcome::Continue,
                    Err(e) => abort_on_violation(&format!("write tail-scan unlock_and_wait: {e:?}")),
                }
            }
        }
    }

    fn wait_out_readers_with_push_locks(&self, waiter: &Waiter) -> QueueToken<'_> {
        let waiter_ptr = waiter as *const Waiter as *const ();
        let mut range = self.push_locks.acquire_start(waiter_ptr);
        let mut watch = ExpressCommitsWatch::new(&self.express_commits);

        loop {
            let token = self.acquired_reads.lock();
            match self.try_wait_all_current_readers(token, waiter) {
                WaitAllOutcome::Done(token) => {
                    self.push_locks.release(range);
                    return token;
                }
                WaitAllOutcome::Continue => {}
                WaitAllOutcome::AllMarked(_) => {
                    if !watch.changed_since(&self.express_commits) {
                        self.push_locks.widen(&mut range);
                    }
                }
            }
        }
    }

    fn wait_out_readers_no_push_locks(&self, waiter: &Waiter) -> QueueToken<'_> {
        loop {
            let token = self.acquired_reads.lock();
            match self.try_wait_all_current_readers(token, waiter) {
                WaitAllOutcome::Done(token) => return token,
                WaitAllOutcome::Continue | WaitAllOutcome::AllMarked(_) => {}
            }
        }
    }

    /// Spec.md §4.6 "Try-write". Never enqueues into `waiting_writes`.
    pub fn trywrlock(&self) -> Option<WriteToken<'_>> {
        let token = match self.acquired_reads.try_lock() {
            Some(t) => t,
            None => {
                log::trace!("mutexgear: trywrlock found access_lock busy");
                return None;
            }
        };
        if !self.is_held_locked(&token) {
            Some(WriteToken { token, node: None })
        } else {
            self.acquired_reads.unlock(token);
            log::trace!("mutexgear: trywrlock found the lock already held");
            None
        }
    }

    /// Spec.md §4.6 "Write release".
    pub fn wrunlock(&self, token: WriteToken<'_>) {
        self.acquired_reads.unlock(token.token);
    }

    pub fn try_destroy(&self) -> Result<()> {
        if !self.express.is_empty_relaxed() {
            return Err(Error::Busy);
        }
        self.acquired_reads.try_destroy()?;
        self.waiting_writes.try_destroy()?;
        self.waiting_reads.try_destroy()?;
        self.read_wait_drain.try_destroy()?;
        self.push_locks.try_destroy()?;
        Ok(())
    }
}
