// ABOUTME: Built-in work types: closure-backed bodies and non-blocking delays
// ABOUTME: DelayWork backs retry backoff dependencies and timeout testing

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::core::{Task, TaskContext, Work};
use super::error::TaskError;

/// A task body built from an async closure.
pub struct BlockWork<F> {
    f: F,
}

impl<F, Fut> BlockWork<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Work for BlockWork<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn perform(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.f)(ctx.clone()).await
    }
}

/// A body which finishes after `interval` elapses.
///
/// The timer is a non-blocking suspension; cancellation short-circuits it so
/// a cancelled delay finishes promptly instead of running out the clock.
pub struct DelayWork {
    interval: Duration,
}

impl DelayWork {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Work for DelayWork {
    async fn perform(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        if self.interval.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            _ = ctx.cancelled() => {}
        }
        Ok(())
    }
}

impl Task {
    /// A task whose body is the given async closure.
    pub fn block<F, Fut>(name: impl Into<String>, f: F) -> Task
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Task::new(name, BlockWork::new(f))
    }

    /// A task that finishes after `interval`. Make another task depend on it
    /// to defer that task's execution.
    pub fn delay(interval: Duration) -> Task {
        Task::new(format!("delay-{interval:?}"), DelayWork::new(interval))
    }
}
