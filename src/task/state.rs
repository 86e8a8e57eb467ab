// ABOUTME: Task lifecycle state machine and legal transition table
// ABOUTME: Illegal transitions are programmer errors and abort via assertion

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// The partial order of legal transitions is fixed; see
/// [`TaskState::can_transition_to`]. The independent cancelled flag lives on
/// the task itself and never changes the state synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Created, not yet submitted to a queue.
    Initialized,
    /// Submitted; waiting for hard dependencies to finish.
    Pending,
    /// Dependencies cleared; conditions are being evaluated.
    EvaluatingConditions,
    /// Conditions evaluated (pass or fail); eligible for execution.
    Ready,
    /// The body is running on the worker pool.
    Executing,
    /// Terminal transition in progress; observers are being notified.
    Finishing,
    /// Done. Errors and observers are frozen.
    Finished,
}

impl TaskState {
    /// Whether moving from `self` to `target` is a legal transition.
    ///
    /// `Pending -> Finishing` is only legal for a cancelled task, which
    /// force-finishes without evaluating conditions or executing.
    pub fn can_transition_to(self, target: TaskState, cancelled: bool) -> bool {
        use TaskState::*;
        matches!(
            (self, target),
            (Initialized, Pending)
                | (Pending, EvaluatingConditions)
                | (EvaluatingConditions, Ready)
                | (Ready, Executing)
                | (Ready, Finishing)
                | (Executing, Finishing)
                | (Finishing, Finished)
        ) || (self == Pending && target == Finishing && cancelled)
    }

    /// Asserts the transition is legal, aborting the process otherwise.
    ///
    /// The state machine is load-bearing for the whole engine, so a bad
    /// transition is a scheduler bug that must not be silently tolerated.
    pub(crate) fn transition_to(self, target: TaskState, cancelled: bool, name: &str) -> TaskState {
        assert!(
            self.can_transition_to(target, cancelled),
            "illegal state transition {self:?} -> {target:?} for task `{name}`"
        );
        target
    }

    pub fn is_finished(self) -> bool {
        self == TaskState::Finished
    }

    pub fn is_executing(self) -> bool {
        self == TaskState::Executing
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Initialized => "initialized",
            TaskState::Pending => "pending",
            TaskState::EvaluatingConditions => "evaluating_conditions",
            TaskState::Ready => "ready",
            TaskState::Executing => "executing",
            TaskState::Finishing => "finishing",
            TaskState::Finished => "finished",
        };
        write!(f, "{label}")
    }
}
