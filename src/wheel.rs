//! The wheel: a three-slot rotating mutex handoff used for one-directional
//! progress signalling from a worker to a waiter without either side
//! busy-waiting (spec.md §4.1).
//!
//! This is the "source-protected technique the library is built around"
//! (spec.md §4.2): the worker only ever *try*-acquires on [`Wheel::advance`],
//! so it can never block; the waiter's [`Wheel::grip_on`]/[`Wheel::turn`]
//! never need the worker's cooperation beyond the worker's own `advance`
//! (spec.md §9). An implementation using condition variables in place of the
//! three-mutex rotation would fail that never-block-the-worker property and
//! is explicitly called out in spec.md §9 as not substitutable — so, unlike
//! the completion handshake's detach locks (which *do* block), the wheel
//! slots are driven purely through [`crate::sys::RawLock`]'s try/acquire
//! surface.

use std::cell::Cell;

use crate::error::{Error, Result};
use crate::sys::{RawLock, WheelAttr};

const NUM_SLOTS: usize = 3;
const FIRST_SLOT: usize = 0;

fn next_slot(i: usize) -> usize {
    if i + 1 != NUM_SLOTS {
        i + 1
    } else {
        0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WheelSide {
    /// Not currently engaged (fresh, or disengaged).
    Invalid,
    At(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ClientSide {
    /// Not gripped on; `usize` is the slot the next `push_on`/`grip_on` will
    /// start trying from (spec.md §4.1's "remembered push index").
    PushOn(usize),
    Gripped(usize),
}

/// A three-slot progress wheel. One worker [`Wheel::engage`]s it and
/// advances it to publish forward progress; one waiter at a time
/// [`Wheel::grip_on`]s it and [`Wheel::turn`]s with the worker's rotation.
pub struct Wheel {
    slots: [RawLock; NUM_SLOTS],
    wheel_side: Cell<WheelSide>,
    client_side: Cell<ClientSide>,
    attr: WheelAttr,
}

// SAFETY: `wheel_side` is only ever touched by the single engaged worker
// thread and `client_side` only by the single gripped-on waiter thread;
// cross-thread visibility of slot ownership is provided by the slot
// `RawLock`s themselves. This mirrors the original's per-side index fields.
unsafe impl Sync for Wheel {}

impl Wheel {
    pub fn new() -> Self {
        Self::with_attr(WheelAttr::default())
    }

    /// Same as [`Wheel::new`], additionally accepting the pshared/protocol
    /// attribute object spec.md §6 lists as part of the external interface
    /// (stored only; see `sys::attr` module docs).
    pub fn with_attr(attr: WheelAttr) -> Self {
        Self {
            slots: [RawLock::new(), RawLock::new(), RawLock::new()],
            wheel_side: Cell::new(WheelSide::Invalid),
            client_side: Cell::new(ClientSide::PushOn(FIRST_SLOT)),
            attr,
        }
    }

    pub fn attr(&self) -> &WheelAttr {
        &self.attr
    }

    /// Worker-side: attach to the wheel at the first slot.
    ///
    /// Uses try-acquire, not a blocking acquire: external logic must
    /// guarantee the slot is free for a driven-attach at this point
    /// (spec.md §4.1).
    pub fn engage(&self) -> Result<()> {
        match self.wheel_side.get() {
            WheelSide::Invalid => {
                self.slots[FIRST_SLOT].try_acquire()?;
                self.wheel_side.set(WheelSide::At(FIRST_SLOT));
                Ok(())
            }
            WheelSide::At(_) => Err(Error::Busy),
        }
    }

    /// Worker-side: publish progress by rotating to the next slot.
    ///
    /// Only ever try-acquires; on `Busy` the caller's signal was already
    /// visible to a waiter holding the next slot, so progress is already
    /// observable and this returns success without advancing.
    pub fn advance(&self) -> Result<()> {
        let cur = match self.wheel_side.get() {
            WheelSide::At(i) => i,
            WheelSide::Invalid => return Err(Error::NotPermitted),
        };
        let next = next_slot(cur);

        match self.slots[next].try_acquire() {
            Ok(()) => {
                self.slots[cur].release();
                self.wheel_side.set(WheelSide::At(next));
                Ok(())
            }
            Err(Error::Busy) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Worker-side: release the currently held slot and detach.
    pub fn disengage(&self) -> Result<()> {
        match self.wheel_side.get() {
            WheelSide::At(i) => {
                self.slots[i].release();
                self.wheel_side.set(WheelSide::Invalid);
                Ok(())
            }
            WheelSide::Invalid => Err(Error::NotPermitted),
        }
    }

    /// Waiter-side: acquire some slot the worker does not currently hold,
    /// scanning backward from the remembered push index.
    pub fn grip_on(&self) -> Result<()> {
        let start = match self.client_side.get() {
            ClientSide::PushOn(idx) => idx,
            ClientSide::Gripped(_) => return Err(Error::Busy),
        };

        let mut trial = start;
        loop {
            trial = if trial != 0 { trial - 1 } else { NUM_SLOTS - 1 };
            match self.slots[trial].try_acquire() {
                Ok(()) => {
                    self.client_side.set(ClientSide::Gripped(trial));
                    return Ok(());
                }
                Err(Error::Busy) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Waiter-side: block-acquire the next slot, then release the current
    /// one. This is the step that pulls the waiter along behind the
    /// worker's rotation.
    pub fn turn(&self) -> Result<()> {
        let cur = match self.client_side.get() {
            ClientSide::Gripped(i) => i,
            ClientSide::PushOn(_) => return Err(Error::NotPermitted),
        };
        let next = next_slot(cur);

        self.slots[next].acquire();
        self.slots[cur].release();
        self.client_side.set(ClientSide::Gripped(next));
        Ok(())
    }

    /// Waiter-side: release the currently gripped slot and record the next
    /// index as the next push-on start.
    pub fn release(&self) -> Result<()> {
        let cur = match self.client_side.get() {
            ClientSide::Gripped(i) => i,
            ClientSide::PushOn(_) => return Err(Error::NotPermitted),
        };

        self.slots[cur].release();
        self.client_side.set(ClientSide::PushOn(next_slot(cur)));
        Ok(())
    }

    /// Waiter-side one-shot: block on the current push index and release
    /// immediately. The cheap "has the worker passed this point yet?" check.
    pub fn push_on(&self) -> Result<()> {
        let idx = match self.client_side.get() {
            ClientSide::PushOn(idx) => idx,
            ClientSide::Gripped(_) => return Err(Error::Busy),
        };

        self.slots[idx].acquire();
        self.slots[idx].release();
        Ok(())
    }

    /// Destroy-time check: fails with `Busy` if the worker is still
    /// engaged or the waiter is still gripped on.
    pub fn try_destroy(&self) -> Result<()> {
        if matches!(self.wheel_side.get(), WheelSide::At(_)) {
            return Err(Error::Busy);
        }
        if matches!(self.client_side.get(), ClientSide::Gripped(_)) {
            return Err(Error::Busy);
        }
        for slot in &self.slots {
            slot.try_destroy()?;
        }
        Ok(())
    }
}

impl Default for Wheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn engage_is_exclusive() {
        let wheel = Wheel::new();
        wheel.engage().unwrap();
        assert_eq!(wheel.engage(), Err(Error::Busy));
    }

    #[test]
    fn worker_never_blocks_on_advance() {
        let wheel = Arc::new(Wheel::new());
        wheel.engage().unwrap();
        wheel.grip_on().unwrap();

        // The waiter holds the slot the worker would advance into; the
        // worker's advance must still return immediately (Ok, no-op).
        wheel.advance().unwrap();
    }

    #[test]
    fn waiter_follows_worker_rotation() {
        let wheel = Arc::new(Wheel::new());
        wheel.engage().unwrap();
        wheel.grip_on().unwrap();

        let w2 = wheel.clone();
        let worker = thread::spawn(move || {
            for _ in 0..5 {
                thread::sleep(Duration::from_millis(2));
                w2.advance().unwrap();
            }
        });

        for _ in 0..5 {
            wheel.turn().unwrap();
        }
        wheel.release().unwrap();

        worker.join().unwrap();
    }

    #[test]
    fn push_on_observes_a_passed_worker() {
        let wheel = Arc::new(Wheel::new());
        wheel.engage().unwrap();

        let w2 = wheel.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            w2.advance().unwrap();
        });

        wheel.push_on().unwrap();
        worker.join().unwrap();
    }
}
