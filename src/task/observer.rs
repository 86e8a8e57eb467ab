// ABOUTME: Task lifecycle observers: trait, closure adapters, tracing and timeout
// ABOUTME: Events per task are ordered: start, produced (in order), then finish once

use std::time::Duration;

use tracing::{debug, warn};

use super::core::TaskHandle;
use super::error::TaskError;

/// Observes lifecycle events of a single task.
///
/// For any task the callbacks are ordered: `on_start` (only if the body
/// actually runs), zero or more `on_produce` in production order, then
/// `will_finish` and `on_finish` exactly once.
pub trait Observer: Send + Sync {
    /// The body is about to run.
    fn on_start(&self, _task: &TaskHandle) {}

    /// The body submitted `produced` to the queue it is running on.
    fn on_produce(&self, _task: &TaskHandle, _produced: &TaskHandle) {}

    /// The task entered `Finishing`; errors are final but the state is not
    /// yet `Finished`.
    fn will_finish(&self, _task: &TaskHandle, _errors: &[TaskError]) {}

    /// The task reached `Finished`.
    fn on_finish(&self, _task: &TaskHandle, _errors: &[TaskError]) {}
}

/// Observer invoking a closure when the body starts.
pub struct StartObserver<F>(F);

impl<F: Fn(&TaskHandle) + Send + Sync> StartObserver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(&TaskHandle) + Send + Sync> Observer for StartObserver<F> {
    fn on_start(&self, task: &TaskHandle) {
        (self.0)(task)
    }
}

/// Observer invoking a closure for every produced task.
pub struct ProduceObserver<F>(F);

impl<F: Fn(&TaskHandle, &TaskHandle) + Send + Sync> ProduceObserver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(&TaskHandle, &TaskHandle) + Send + Sync> Observer for ProduceObserver<F> {
    fn on_produce(&self, task: &TaskHandle, produced: &TaskHandle) {
        (self.0)(task, produced)
    }
}

/// Observer invoking a closure just before the terminal transition.
pub struct WillFinishObserver<F>(F);

impl<F: Fn(&TaskHandle, &[TaskError]) + Send + Sync> WillFinishObserver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(&TaskHandle, &[TaskError]) + Send + Sync> Observer for WillFinishObserver<F> {
    fn will_finish(&self, task: &TaskHandle, errors: &[TaskError]) {
        (self.0)(task, errors)
    }
}

/// Observer invoking a closure once the task has finished.
pub struct FinishObserver<F>(F);

impl<F: Fn(&TaskHandle, &[TaskError]) + Send + Sync> FinishObserver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(&TaskHandle, &[TaskError]) + Send + Sync> Observer for FinishObserver<F> {
    fn on_finish(&self, task: &TaskHandle, errors: &[TaskError]) {
        (self.0)(task, errors)
    }
}

/// Logs task lifecycle events through `tracing`.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_start(&self, task: &TaskHandle) {
        debug!("task `{}` started", task.name());
    }

    fn on_produce(&self, task: &TaskHandle, produced: &TaskHandle) {
        debug!("task `{}` produced `{}`", task.name(), produced.name());
    }

    fn on_finish(&self, task: &TaskHandle, errors: &[TaskError]) {
        if errors.is_empty() {
            debug!("task `{}` finished", task.name());
        } else {
            warn!("task `{}` finished with errors: {:?}", task.name(), errors);
        }
    }
}

/// Cancels the observed task with [`TaskError::TimedOut`] if it is still
/// running once the deadline elapses.
///
/// Additive to ordinary cancellation: the timer starts when the body starts,
/// and cancellation stays cooperative, so the body must still notice it.
pub struct TimeoutObserver {
    after: Duration,
}

impl TimeoutObserver {
    pub fn new(after: Duration) -> Self {
        Self { after }
    }
}

impl Observer for TimeoutObserver {
    fn on_start(&self, task: &TaskHandle) {
        let handle = task.clone();
        let after = self.after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !handle.is_finished() {
                warn!("task `{}` timed out after {:?}", handle.name(), after);
                handle.cancel_with_error(TaskError::TimedOut { after });
            }
        });
    }
}
