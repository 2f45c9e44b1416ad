//! The subscription dispatch queue: priority ordering, cooldowns, and
//! failure policy for backends that don't charge per call.

pub mod queue;

pub use queue::{
    ActiveItem, BackendHealth, CompletedItem, ItemStatus, QueueItem, Scheduler, SchedulerState,
};
