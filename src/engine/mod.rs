// ABOUTME: Scheduling engine: the task queue, exclusivity and delegate
// ABOUTME: Wires conditions into dependency edges and drives a worker pool

pub mod delegate;
pub mod exclusivity;
pub mod queue;

pub use delegate::QueueDelegate;
pub use exclusivity::ExclusivityManager;
pub use queue::{QueueStats, TaskQueue};
