// ABOUTME: Built-in conditions: closures, exclusion categories, dependency
// ABOUTME: outcomes and connectivity checks

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Condition, ConditionResult};
use crate::reachability::{Connectivity, ReachabilityGate};
use crate::task::{TaskError, TaskHandle};

/// A condition evaluated by an async closure.
pub struct BlockCondition<F> {
    name: String,
    f: F,
}

impl<F, Fut> BlockCondition<F>
where
    F: Fn(TaskHandle) -> Fut + Send + Sync,
    Fut: Future<Output = ConditionResult> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Condition for BlockCondition<F>
where
    F: Fn(TaskHandle) -> Fut + Send + Sync,
    Fut: Future<Output = ConditionResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, task: &TaskHandle) -> ConditionResult {
        (self.f)(task.clone()).await
    }
}

/// An always-satisfied condition whose only effect is to place its task in a
/// mutual-exclusion category.
///
/// Tasks sharing a category never execute concurrently and are admitted in
/// registration order.
pub struct MutuallyExclusive {
    category: String,
}

impl MutuallyExclusive {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }
}

#[async_trait]
impl Condition for MutuallyExclusive {
    fn name(&self) -> &str {
        &self.category
    }

    fn is_mutually_exclusive(&self) -> bool {
        true
    }

    async fn evaluate(&self, _task: &TaskHandle) -> ConditionResult {
        ConditionResult::Satisfied
    }
}

/// Fails unless every dependency of the task finished cleanly.
///
/// Evaluation happens after dependencies have finished, so their error lists
/// are frozen by the time this runs.
pub struct NoFailedDependencies;

#[async_trait]
impl Condition for NoFailedDependencies {
    fn name(&self) -> &str {
        "no-failed-dependencies"
    }

    async fn evaluate(&self, task: &TaskHandle) -> ConditionResult {
        for dependency in task.dependencies() {
            if dependency.is_cancelled() {
                return ConditionResult::Failed(TaskError::RequirementNotSatisfied(format!(
                    "dependency `{}` was cancelled",
                    dependency.name()
                )));
            }
            if !dependency.errors().is_empty() {
                return ConditionResult::Failed(TaskError::RequirementNotSatisfied(format!(
                    "dependency `{}` finished with errors",
                    dependency.name()
                )));
            }
        }
        ConditionResult::Satisfied
    }
}

/// Satisfied only while the gate reports connectivity of the required kind.
///
/// Pair with a retry controller and [`crate::retry::NetworkRecovery`] to
/// defer work until the network returns instead of failing outright.
pub struct ReachabilityCondition {
    gate: Arc<dyn ReachabilityGate>,
    via: Connectivity,
}

impl ReachabilityCondition {
    pub fn new(gate: Arc<dyn ReachabilityGate>, via: Connectivity) -> Self {
        Self { gate, via }
    }
}

#[async_trait]
impl Condition for ReachabilityCondition {
    fn name(&self) -> &str {
        "reachable"
    }

    async fn evaluate(&self, _task: &TaskHandle) -> ConditionResult {
        if self.gate.status().satisfies(self.via) {
            ConditionResult::Satisfied
        } else {
            ConditionResult::Failed(TaskError::RequiresConnectivityWait { via: self.via })
        }
    }
}
