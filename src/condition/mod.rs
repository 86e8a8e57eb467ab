// ABOUTME: Async pre-conditions attached to tasks and their concurrent evaluation
// ABOUTME: Every condition is always evaluated so all failures stay visible

pub mod block;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::task::{Task, TaskError, TaskHandle};

pub use block::{BlockCondition, MutuallyExclusive, NoFailedDependencies, ReachabilityCondition};

/// Outcome of evaluating a single condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionResult {
    Satisfied,
    Failed(TaskError),
}

impl ConditionResult {
    fn into_error(self) -> Option<TaskError> {
        match self {
            ConditionResult::Satisfied => None,
            ConditionResult::Failed(error) => Some(error),
        }
    }
}

/// An asynchronous pre-condition of a task.
///
/// A condition may contribute a prerequisite task (requested once at
/// submission) and may name a mutual-exclusion category. Conditions hold no
/// task-scoped mutable state across evaluations.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Whether tasks carrying this condition must never run concurrently
    /// with other tasks in the same category.
    fn is_mutually_exclusive(&self) -> bool {
        false
    }

    /// The mutual-exclusion category. Defaults to the condition name.
    fn category(&self) -> &str {
        self.name()
    }

    /// An optional prerequisite task (for example "request permission"),
    /// submitted by the queue as a hard dependency of `task`.
    fn dependency(&self, _task: &TaskHandle) -> Option<Task> {
        None
    }

    /// Evaluates the condition for `task`. May suspend for an arbitrary
    /// external duration without occupying a worker thread.
    async fn evaluate(&self, task: &TaskHandle) -> ConditionResult;
}

/// Evaluates every condition of `task` concurrently and returns all failures
/// wrapped as [`TaskError::ConditionFailed`].
///
/// There is deliberately no early exit: partial evaluation would hide
/// failures from the task's observers. Enforcement happens at the execution
/// gate, not here.
pub(crate) async fn evaluate_conditions(
    conditions: &[std::sync::Arc<dyn Condition>],
    task: &TaskHandle,
) -> Vec<TaskError> {
    if conditions.is_empty() {
        return Vec::new();
    }
    debug!(
        "evaluating {} conditions for task `{}`",
        conditions.len(),
        task.name()
    );
    let evaluations = conditions.iter().map(|condition| async move {
        let result = condition.evaluate(task).await;
        result.into_error().map(|error| TaskError::ConditionFailed {
            condition: condition.name().to_string(),
            message: error.to_string(),
        })
    });
    join_all(evaluations).await.into_iter().flatten().collect()
}
