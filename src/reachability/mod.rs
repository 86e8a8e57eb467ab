// ABOUTME: Network connectivity model and the reachability gate
// ABOUTME: Fires one-shot callbacks when connectivity of a requested kind returns

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::task::{Task, TaskContext, TaskError, Work};

/// The kind of connectivity a caller requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    /// Any connection kind will do.
    Any,
    /// Requires Wi-Fi; a cellular connection does not satisfy this.
    Wifi,
    /// A cellular connection; satisfied by any reachable status.
    Cellular,
}

/// The current network status as reported by the platform integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    NotReachable,
    Reachable(Connectivity),
}

impl NetworkStatus {
    /// Whether this status satisfies the requested connectivity kind.
    ///
    /// A Wi-Fi requirement is not satisfied by a cellular connection; any
    /// reachable status satisfies `Any` and `Cellular` requests.
    pub fn satisfies(&self, wanted: Connectivity) -> bool {
        match (self, wanted) {
            (NetworkStatus::NotReachable, _) => false,
            (NetworkStatus::Reachable(Connectivity::Cellular), Connectivity::Wifi) => false,
            (NetworkStatus::Reachable(_), _) => true,
        }
    }
}

/// A service which fires a one-shot callback when network connectivity of a
/// requested kind becomes available.
///
/// Implementations must invoke each registered callback exactly once, on the
/// first satisfying status, and drop it afterwards.
pub trait ReachabilityGate: Send + Sync {
    /// The most recently observed network status.
    fn status(&self) -> NetworkStatus;

    /// Registers `callback` to fire once connectivity satisfying `via` is
    /// observed. If the current status already satisfies the request, the
    /// callback fires immediately.
    fn when_reachable(&self, via: Connectivity, callback: Box<dyn FnOnce() + Send>);
}

struct PendingObserver {
    via: Connectivity,
    callback: Box<dyn FnOnce() + Send>,
}

struct MonitorInner {
    status: NetworkStatus,
    observers: Vec<PendingObserver>,
}

/// In-process [`ReachabilityGate`] implementation.
///
/// The platform integration (out of scope here) feeds status changes through
/// [`ReachabilityMonitor::set_status`]; pending observers whose requested
/// connectivity is satisfied are fired, each exactly once, and removed.
pub struct ReachabilityMonitor {
    inner: Mutex<MonitorInner>,
}

impl ReachabilityMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                status: initial,
                observers: Vec::new(),
            }),
        }
    }

    /// Publishes a new network status, firing any observers it satisfies.
    ///
    /// Callbacks run outside the registry lock.
    pub fn set_status(&self, status: NetworkStatus) {
        let fired = {
            let mut inner = self.inner.lock().expect("reachability registry poisoned");
            inner.status = status;
            let mut fired = Vec::new();
            let mut remaining = Vec::new();
            for observer in inner.observers.drain(..) {
                if status.satisfies(observer.via) {
                    fired.push(observer.callback);
                } else {
                    remaining.push(observer);
                }
            }
            inner.observers = remaining;
            fired
        };
        if !fired.is_empty() {
            debug!(
                "connectivity now {:?}, notifying {} waiters",
                status,
                fired.len()
            );
        }
        for callback in fired {
            callback();
        }
    }

    /// Number of observers still waiting for connectivity.
    pub fn pending_observers(&self) -> usize {
        self.inner
            .lock()
            .expect("reachability registry poisoned")
            .observers
            .len()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::NotReachable)
    }
}

impl ReachabilityGate for ReachabilityMonitor {
    fn status(&self) -> NetworkStatus {
        self.inner
            .lock()
            .expect("reachability registry poisoned")
            .status
    }

    fn when_reachable(&self, via: Connectivity, callback: Box<dyn FnOnce() + Send>) {
        let satisfied_now = {
            let mut inner = self.inner.lock().expect("reachability registry poisoned");
            if inner.status.satisfies(via) {
                Some(callback)
            } else {
                inner.observers.push(PendingObserver { via, callback });
                None
            }
        };
        if let Some(callback) = satisfied_now {
            callback();
        }
    }
}

/// Work that suspends until the gate reports satisfying connectivity.
struct ReachabilityWaitWork {
    receiver: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait::async_trait]
impl Work for ReachabilityWaitWork {
    async fn perform(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let receiver = self
            .receiver
            .lock()
            .expect("reachability wait receiver poisoned")
            .take();
        let Some(receiver) = receiver else {
            return Ok(());
        };
        tokio::select! {
            _ = receiver => Ok(()),
            _ = ctx.cancelled() => Ok(()),
        }
    }
}

/// Builds a task that finishes once `gate` observes connectivity satisfying
/// `via` (or the task is cancelled). Intended as a dependency of work that
/// must wait for the network to return.
pub fn wait_task(gate: &Arc<dyn ReachabilityGate>, via: Connectivity) -> Task {
    let (sender, receiver) = oneshot::channel();
    gate.when_reachable(
        via,
        Box::new(move || {
            let _ = sender.send(());
        }),
    );
    Task::new(
        format!("wait-for-connectivity-{via:?}").to_lowercase(),
        ReachabilityWaitWork {
            receiver: Mutex::new(Some(receiver)),
        },
    )
}
