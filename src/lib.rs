//! MutexGear: a wheel-based completion-queue framework and a reader-writer
//! lock with bounded writer latency built atop it.
//!
//! The original MutexGear library targets pthreads on POSIX systems,
//! including process-shared (`PTHREAD_PROCESS_SHARED`) placement backed by
//! self-relative pointer encoding. This port targets a single hosted Rust
//! process: it keeps the self-relative `wow` encoding (so the on-disk/​
//! in-struct layout story stays intact) but builds its mutexes and condition
//! variables on `std::sync` rather than `pthread_mutex_t`/`pthread_cond_t`,
//! and does not support cross-process sharing.

#[macro_use]
extern crate static_assertions;

pub mod completion;
pub mod error;
pub mod list;
pub mod rwlock;
pub mod sys;
pub mod wheel;

pub use completion::{CancelableQueue, CompletionItem, DrainableQueue, Ownership, Waiter, Worker};
pub use error::{Error, Result};
pub use rwlock::{ChannelCount, RwLock, TrdlRwLock, WaitingReadersPromotion};
pub use sys::attr::{CompletionAttr, LockAttr, Protocol, Pshared, RwLockAttr, WheelAttr};
pub use wheel::Wheel;
