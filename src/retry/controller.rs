// ABOUTME: Generic retry/repeat controllers: resubmit task instances with
// ABOUTME: computed delays, consulting a recovery policy on every failure

use std::time::Duration;

use tracing::{debug, info, warn};

use super::wait::WaitStrategy;
use crate::engine::TaskQueue;
use crate::task::{Task, TaskError, TaskHandle};

/// The next attempt: a fresh task instance plus the delay to wait before
/// submitting it. Recovery policies may mutate both.
pub struct Payload {
    pub task: Task,
    pub delay: Option<Duration>,
}

/// What a recovery policy learns about the attempt that just failed.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// Name of the task instance that failed.
    pub task_name: String,
    /// The failed attempt's error list.
    pub errors: Vec<TaskError>,
    /// Errors of every attempt so far, in attempt order.
    pub aggregate_errors: Vec<TaskError>,
    /// Attempts made so far (the failed one included).
    pub attempt: u32,
}

/// Re-submits task instances from a factory until one succeeds, the recovery
/// policy gives up, the factory runs dry, or `max_attempts` is exhausted.
///
/// The recovery policy receives the failure info and the candidate payload
/// for the next attempt; returning `None` ends the sequence with the last
/// failure's errors. Delays are realized as non-blocking timers.
pub struct RetryController<S, R>
where
    S: FnMut() -> Option<Task> + Send,
    R: FnMut(&FailureInfo, Payload) -> Option<Payload> + Send,
{
    queue: TaskQueue,
    source: S,
    max_attempts: u32,
    strategy: WaitStrategy,
    recovery: R,
    configure: Option<Box<dyn Fn(&mut Task) + Send>>,
}

impl<S, R> RetryController<S, R>
where
    S: FnMut() -> Option<Task> + Send,
    R: FnMut(&FailureInfo, Payload) -> Option<Payload> + Send,
{
    pub fn new(
        queue: TaskQueue,
        max_attempts: u32,
        strategy: WaitStrategy,
        source: S,
        recovery: R,
    ) -> Self {
        assert!(max_attempts >= 1, "retry needs at least one attempt");
        Self {
            queue,
            source,
            max_attempts,
            strategy,
            recovery,
            configure: None,
        }
    }

    /// A callback applied to every task instance before submission, e.g. to
    /// attach observers or conditions uniformly across attempts.
    pub fn with_configure(mut self, configure: impl Fn(&mut Task) + Send + 'static) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    fn next_payload(&mut self, resubmission: u32) -> Option<Payload> {
        let task = (self.source)()?;
        let delay = if resubmission == 0 {
            None
        } else {
            Some(self.strategy.delay(resubmission - 1))
        };
        Some(Payload { task, delay })
    }

    /// Drives the retry sequence to completion.
    ///
    /// Returns the handle of the successful attempt, or the last attempt's
    /// errors once the sequence fails terminally.
    pub async fn run(mut self) -> Result<TaskHandle, Vec<TaskError>> {
        let mut attempts: u32 = 0;
        let mut aggregate_errors = Vec::new();
        let mut last_errors = Vec::new();
        let mut next = self.next_payload(0);

        while let Some(mut payload) = next.take() {
            attempts += 1;
            if let Some(configure) = &self.configure {
                configure(&mut payload.task);
            }
            if let Some(delay) = payload.delay {
                if !delay.is_zero() {
                    debug!("waiting {delay:?} before attempt {attempts}");
                    tokio::time::sleep(delay).await;
                }
            }

            let handle = self.queue.submit(payload.task);
            let errors = handle.wait().await;
            if errors.is_empty() {
                info!("task `{}` succeeded on attempt {attempts}", handle.name());
                return Ok(handle);
            }

            debug!(
                "task `{}` failed attempt {attempts}/{}: {errors:?}",
                handle.name(),
                self.max_attempts
            );
            aggregate_errors.extend(errors.clone());
            last_errors = errors;

            if attempts >= self.max_attempts {
                warn!(
                    "task `{}` exhausted {attempts} attempts",
                    handle.name()
                );
                break;
            }

            let info = FailureInfo {
                task_name: handle.name().to_string(),
                errors: last_errors.clone(),
                aggregate_errors: aggregate_errors.clone(),
                attempt: attempts,
            };
            next = match self.next_payload(attempts) {
                Some(candidate) => (self.recovery)(&info, candidate),
                None => None,
            };
        }

        Err(last_errors)
    }
}

/// Outcome of a repeat sequence.
#[derive(Debug, Clone)]
pub struct RepeatOutcome {
    /// How many instances ran.
    pub runs: u32,
    /// Errors of the final instance (empty if it succeeded).
    pub last_errors: Vec<TaskError>,
}

/// Runs instances from a factory back to back, regardless of their outcome,
/// with strategy delays in between. Useful for periodic idempotent work.
pub struct RepeatController<S>
where
    S: FnMut() -> Option<Task> + Send,
{
    queue: TaskQueue,
    source: S,
    strategy: WaitStrategy,
    max_count: Option<u32>,
}

impl<S> RepeatController<S>
where
    S: FnMut() -> Option<Task> + Send,
{
    pub fn new(queue: TaskQueue, strategy: WaitStrategy, source: S) -> Self {
        Self {
            queue,
            source,
            strategy,
            max_count: None,
        }
    }

    /// Caps the total number of instances, counting the first.
    pub fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub async fn run(mut self) -> RepeatOutcome {
        let mut runs: u32 = 0;
        let mut last_errors = Vec::new();
        loop {
            if let Some(max) = self.max_count {
                if runs >= max {
                    break;
                }
            }
            let Some(task) = (self.source)() else {
                break;
            };
            if runs > 0 {
                let delay = self.strategy.delay(runs - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            let handle = self.queue.submit(task);
            last_errors = handle.wait().await;
            runs += 1;
        }
        debug!("repeat sequence ended after {runs} runs");
        RepeatOutcome { runs, last_errors }
    }
}
