//! Scenario-style stress tests for `mutexgear::rwlock`, exercising real OS
//! threads rather than single-threaded unit assertions (spec.md §8).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mutexgear::sys::ManualEvent;
use mutexgear::{
    CancelableQueue, ChannelCount, CompletionItem, Ownership, RwLock, TrdlRwLock, Waiter,
    WaitingReadersPromotion, Worker,
};
use rand::Rng;

#[test]
fn many_readers_one_writer_counter_stays_consistent() {
    const READERS: usize = 12;
    const WRITERS: usize = 2;
    const ITERS: usize = 150;
    const WRITE_BIT: usize = 1 << 31;

    let lock = Arc::new(RwLock::new(0usize));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERS {
                    let guard = lock.read();
                    assert_eq!(*guard & WRITE_BIT, 0, "reader observed a writer mid-flight");
                    thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                    drop(guard);
                    thread::yield_now();
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERS {
                    let mut guard = lock.write();
                    assert_eq!(*guard & WRITE_BIT, 0);
                    *guard |= WRITE_BIT;
                    thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                    *guard &= !WRITE_BIT;
                    *guard += 1;
                    drop(guard);
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in readers {
        h.join().unwrap();
    }
    for h in writers {
        h.join().unwrap();
    }

    assert_eq!(*lock.read(), WRITERS * ITERS);
}

#[test]
fn writers_never_run_concurrently() {
    const WRITERS: usize = 6;
    const ITERS: usize = 300;

    let lock = Arc::new(RwLock::new(0i64));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    let mut guard = lock.write();
                    let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert_eq!(now_inside, 1, "two writers held the lock at once");
                    *guard += 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.read(), (WRITERS * ITERS) as i64);
}

#[test]
fn randomized_read_write_mix_does_not_deadlock() {
    const THREADS: usize = 10;
    const ITERS: usize = 100;

    let lock = Arc::new(RwLock::new(vec![0u32; 4]));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERS {
                    if rng.gen_bool(0.8) {
                        let guard = lock.read();
                        let _ = guard.iter().sum::<u32>();
                    } else {
                        let mut guard = lock.write();
                        guard[i % guard.len()] += 1;
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn waiting_readers_promotion_bounded_admits_a_few_more_readers() {
    let lock = Arc::new(RwLock::with_channels(0u64, ChannelCount::Two));

    // Hold a read for a moment so a writer has to queue behind it, then
    // confirm a bounded promotion window still lets a fresh writer proceed.
    let held = lock.read();
    let writer_lock = lock.clone();
    let writer = thread::spawn(move || {
        let mut guard = writer_lock.write_with(WaitingReadersPromotion::Bounded(4));
        *guard += 1;
    });

    thread::sleep(Duration::from_millis(5));
    drop(held);
    writer.join().unwrap();

    assert_eq!(*lock.read(), 1);
}

#[test]
fn trdl_try_read_and_write_interleave() {
    let lock = Arc::new(TrdlRwLock::new(0i32));

    for _ in 0..50 {
        if let Some(guard) = lock.try_read() {
            let _ = *guard;
        }
        {
            let mut guard = lock.write();
            *guard += 1;
        }
    }

    assert_eq!(*lock.read(), 50);
}

#[test]
fn trdl_try_read_rejected_while_writer_queued() {
    let lock = Arc::new(TrdlRwLock::new(()));
    let held = lock.read();

    let writer_lock = lock.clone();
    let writer = thread::spawn(move || {
        let _guard = writer_lock.write();
    });

    thread::sleep(Duration::from_millis(5));
    assert!(lock.try_read().is_none(), "a queued writer must block new try-reads");

    drop(held);
    writer.join().unwrap();

    assert!(lock.try_read().is_some());
}

/// spec.md §8 scenario 4: every fourth produced item is linked into a side
/// list, then a cancel pass runs over it; the sum of index values of
/// `{consumed} ∪ {aborted} ∪ {canceled-before-start} ∪ {dropped-on-finalize}`
/// must equal n(n+1)/2 for n items produced.
#[test]
fn cancelable_queue_producer_consumer_accounts_for_every_item() {
    const N: usize = 40;

    let queue = Arc::new(CancelableQueue::new());
    let worker = Arc::new(Worker::new());
    worker.start().unwrap();

    let items: Vec<Arc<CompletionItem>> = (0..N).map(|_| Arc::new(CompletionItem::new())).collect();
    let worker_ptr = Arc::as_ptr(&worker) as *const ();

    let mut consumed = Vec::new();
    let mut aborted = Vec::new();
    let mut canceled_before_start = Vec::new();
    let mut dropped_on_finalize = Vec::new();

    let mut side_list_pos = 0usize;
    for (slot, item) in items.iter().enumerate() {
        let index = slot + 1;
        match index % 4 {
            1 | 2 => {
                // Ordinary work item: started, enqueued, run to completion.
                item.start(worker_ptr);
                queue.enqueue(item, None);
                queue.safe_finish(item, &worker);
                consumed.push(index);
            }
            3 => {
                // Backlog the single worker never gets to; swept at finalize.
                queue.enqueue(item, None);
            }
            _ => {
                // Every fourth item: a cancel candidate, alternating between
                // "not yet started" and "already in flight".
                let pos = side_list_pos;
                side_list_pos += 1;

                if pos % 2 == 0 {
                    queue.enqueue(item, None);
                    let waiter = Waiter::new();
                    let token = queue.lock();
                    let ownership =
                        queue.unlock_and_cancel::<fn(&Worker)>(item, &waiter, token, None);
                    assert_eq!(ownership, Ownership::Owner);
                    canceled_before_start.push(index);
                } else {
                    item.start(worker_ptr);
                    queue.enqueue(item, None);

                    let entered_cancel = Arc::new(ManualEvent::new());
                    let q2 = queue.clone();
                    let item2 = item.clone();
                    let entered2 = entered_cancel.clone();
                    let canceling = thread::spawn(move || {
                        let waiter = Waiter::new();
                        let token = q2.lock();
                        q2.unlock_and_cancel(&item2, &waiter, token, Some(|_: &Worker| entered2.set()))
                    });

                    entered_cancel.wait();
                    assert!(CancelableQueue::is_canceled(item, &worker));
                    queue.safe_finish(item, &worker);

                    assert_eq!(canceling.join().unwrap(), Ownership::NotOwner);
                    aborted.push(index);
                }
            }
        }
    }

    // Finalize pass: drop whatever backlog the worker never started on.
    for (slot, item) in items.iter().enumerate() {
        let index = slot + 1;
        if index % 4 == 3 {
            let token = queue.lock();
            queue.unsafe_dequeue(item, &token);
            queue.unlock(token);
            dropped_on_finalize.push(index);
        }
    }

    worker.stop().unwrap();

    let mut accounted: Vec<usize> = consumed
        .iter()
        .chain(aborted.iter())
        .chain(canceled_before_start.iter())
        .chain(dropped_on_finalize.iter())
        .copied()
        .collect();
    accounted.sort_unstable();
    assert_eq!(accounted, (1..=N).collect::<Vec<_>>(), "every produced index must be accounted for exactly once");

    let sum: usize = accounted.iter().sum();
    assert_eq!(sum, N * (N + 1) / 2);
}
