//! The completion framework: a queue of work items where each item carries
//! a reference either to the worker currently processing it or to the
//! waiter blocked on it (spec.md §1, §4.2–§4.5).

pub mod cancel;
pub mod drain;
pub mod item;
pub mod queue;
pub mod role;

pub use cancel::{CancelableQueue, Ownership};
pub use drain::{Drain, DrainableQueue, INVALID_DRAIN_INDEX};
pub use item::CompletionItem;
pub use queue::{BasicQueue, QueueToken};
pub use role::{Waiter, Worker};
