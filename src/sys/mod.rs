//! External collaborators spec.md §2/§6 treats as outside the core: system
//! mutexes with try-lock, pointer-sized atomics, and the pshared/priority
//! attribute objects. Implemented here over `std::sync` so the rest of the
//! crate can stay free of raw OS calls.

pub mod atomic;
pub mod attr;
pub mod event;
pub mod lock;

pub use attr::{CompletionAttr, LockAttr, Protocol, RwLockAttr, Pshared, WheelAttr};
pub use event::ManualEvent;
pub use lock::RawLock;
