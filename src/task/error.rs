// ABOUTME: Failure taxonomy for tasks, conditions and retry recovery
// ABOUTME: Tasks never fail synchronously; errors accumulate and surface at finish

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reachability::Connectivity;

/// The ways a task can fail.
///
/// Each condition and each retryable task classifies its own failures into
/// these kinds. Recovery policies only need to recognize
/// [`TaskError::TransientFailure`] and [`TaskError::RequiresConnectivityWait`]
/// to decide on retries; everything else is terminal.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    /// A pre-condition attached to the task failed.
    #[error("condition `{condition}` failed: {message}")]
    ConditionFailed { condition: String, message: String },

    /// The task exceeded its deadline and was cancelled.
    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    /// A requirement the task depends on was not met.
    #[error("requirement not satisfied: {0}")]
    RequirementNotSatisfied(String),

    /// A failure expected to clear on its own; safe to retry with backoff.
    #[error("transient failure: {0}")]
    TransientFailure(String),

    /// The work needs network connectivity of the given kind before another
    /// attempt is worthwhile.
    #[error("requires {via:?} connectivity")]
    RequiresConnectivityWait { via: Connectivity },

    /// Anything the task could not classify further.
    #[error("{0}")]
    Unknown(String),
}

/// Status codes worth retrying: request timeout, rate limiting, and the
/// transient 5xx family.
const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl TaskError {
    /// Classifies an HTTP-ish status code, folding retryable codes into
    /// [`TaskError::TransientFailure`].
    pub fn from_status_code(code: u16) -> TaskError {
        if RETRYABLE_STATUS_CODES.contains(&code) {
            TaskError::TransientFailure(format!("status code {code}"))
        } else {
            TaskError::Unknown(format!("status code {code}"))
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::TransientFailure(_))
    }

    /// Whether a retry should wait for connectivity instead of a timer.
    pub fn needs_connectivity(&self) -> Option<Connectivity> {
        match self {
            TaskError::RequiresConnectivityWait { via } => Some(*via),
            _ => None,
        }
    }
}
