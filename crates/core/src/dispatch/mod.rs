//! Dispatching tasks onto the work queue.
//!
//! The queue carries task ids only; workers re-read the authoritative
//! record from the store when they pick an id up. That makes duplicate
//! queue entries harmless: whichever worker wins the pending ->
//! processing compare-and-set runs the task, everyone else stands down.

mod dispatcher;
mod queue;

pub use dispatcher::{DispatchError, Dispatcher};
pub use queue::{InProcessQueue, Queue, QueueError};
