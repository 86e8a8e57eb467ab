// ABOUTME: Network-aware retry recovery: transient errors back off, offline
// ABOUTME: errors wait for the reachability gate, everything else fails fast

use std::sync::Arc;

use tracing::{debug, warn};

use super::controller::{FailureInfo, Payload};
use crate::engine::TaskQueue;
use crate::reachability::{self, Connectivity, ReachabilityGate};
use crate::task::TaskError;

/// How a recovery policy should treat a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Worth another attempt after the backoff delay.
    Retry,
    /// Defer the next attempt until connectivity of this kind returns.
    WaitForConnectivity(Connectivity),
    /// Not retryable; end the sequence.
    Fail,
}

/// Classifies a task error for retry purposes.
pub fn classify(error: &TaskError) -> ErrorDisposition {
    if let Some(via) = error.needs_connectivity() {
        ErrorDisposition::WaitForConnectivity(via)
    } else if error.is_transient() {
        ErrorDisposition::Retry
    } else {
        ErrorDisposition::Fail
    }
}

/// Recovery policy for network-backed work.
///
/// Inspects the failed attempt's last error: transient failures proceed to
/// the ordinary backoff delay; connectivity failures submit a
/// reachability-wait task and make the next attempt depend on it (clearing
/// the delay, since the gate replaces the clock); anything else is terminal.
///
/// The reachability detour does not consume an extra attempt slot: the
/// deferred attempt is still just the next attempt.
pub struct NetworkRecovery {
    queue: TaskQueue,
    gate: Arc<dyn ReachabilityGate>,
}

impl NetworkRecovery {
    pub fn new(queue: TaskQueue, gate: Arc<dyn ReachabilityGate>) -> Self {
        Self { queue, gate }
    }

    /// The recovery decision for one failed attempt.
    pub fn recover(&self, info: &FailureInfo, mut payload: Payload) -> Option<Payload> {
        let last = info.errors.last()?;
        match classify(last) {
            ErrorDisposition::Fail => {
                warn!(
                    "task `{}` failed with non-retryable error: {last}",
                    info.task_name
                );
                None
            }
            ErrorDisposition::Retry => Some(payload),
            ErrorDisposition::WaitForConnectivity(via) => {
                debug!(
                    "task `{}` deferred until {via:?} connectivity returns",
                    info.task_name
                );
                let wait = reachability::wait_task(&self.gate, via);
                let wait_handle = self.queue.submit(wait);
                payload.task.add_dependency(wait_handle);
                payload.delay = None;
                Some(payload)
            }
        }
    }

    /// Adapts this policy to the closure shape `RetryController` expects.
    pub fn into_recovery_fn(self) -> impl FnMut(&FailureInfo, Payload) -> Option<Payload> + Send {
        move |info, payload| self.recover(info, payload)
    }
}
