// ABOUTME: Queue delegate: how downstream systems observe task outcomes
// ABOUTME: without holding task references themselves

use super::queue::TaskQueue;
use crate::task::{TaskError, TaskHandle};

/// Informed of queue activity. All methods default to no-ops.
///
/// The delegate cannot affect control flow; it exists so reporting and
/// bookkeeping layers can watch outcomes without owning task handles.
pub trait QueueDelegate: Send + Sync {
    /// A task is about to be accepted by the queue. Fires for every
    /// submission, including produced and condition-derived tasks.
    fn will_add(&self, _queue: &TaskQueue, _task: &TaskHandle) {}

    /// The task entered its terminal transition; errors are final but
    /// observers have not all fired yet.
    fn will_finish(&self, _queue: &TaskQueue, _task: &TaskHandle, _errors: &[TaskError]) {}

    /// The task is fully finished and leaves the queue's accounting.
    fn did_finish(&self, _queue: &TaskQueue, _task: &TaskHandle, _errors: &[TaskError]) {}
}
