// ABOUTME: Core task type: state ownership, cancellation, observers and finish
// ABOUTME: State and errors live behind one mutex, never held across an await

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::error::TaskError;
use super::observer::Observer;
use super::state::TaskState;
use crate::condition::Condition;
use crate::engine::TaskQueue;

/// Unique identity of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The body of a task.
///
/// The runtime invokes `perform` at most once, only when the task reached
/// `Ready` with no accumulated errors and without being cancelled. Long
/// bodies should check [`TaskContext::is_cancelled`] (or race
/// [`TaskContext::cancelled`]) to honor cooperative cancellation.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    async fn perform(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

struct TaskInner {
    state: TaskState,
    errors: Vec<TaskError>,
    has_finished: bool,
    did_execute: bool,
    observers: Vec<Arc<dyn Observer>>,
    dependencies: Vec<TaskHandle>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

pub(crate) struct TaskCore {
    id: TaskId,
    name: String,
    inner: Mutex<TaskInner>,
    finished_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
}

impl TaskCore {
    fn new(name: String) -> Self {
        let (finished_tx, _) = watch::channel(false);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: TaskId::new(),
            name,
            inner: Mutex::new(TaskInner {
                state: TaskState::Initialized,
                errors: Vec::new(),
                has_finished: false,
                did_execute: false,
                observers: Vec::new(),
                dependencies: Vec::new(),
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            }),
            finished_tx,
            cancel_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskInner> {
        self.inner.lock().expect("task state lock poisoned")
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub(crate) fn transition(&self, target: TaskState) {
        let cancelled = self.is_cancelled();
        let mut inner = self.lock();
        trace!("task `{}`: {} -> {}", self.name, inner.state, target);
        inner.state = inner.state.transition_to(target, cancelled, &self.name);
    }

    pub(crate) fn append_errors(&self, errors: Vec<TaskError>) {
        if errors.is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.errors.extend(errors);
    }

    /// Enters `Executing`, stamping the start time and the marker that lets
    /// observers tell "failed precondition" from "failed during execution".
    pub(crate) fn mark_executing(&self) {
        let cancelled = self.is_cancelled();
        let mut inner = self.lock();
        inner.state = inner
            .state
            .transition_to(TaskState::Executing, cancelled, &self.name);
        inner.did_execute = true;
        inner.started_at = Some(Utc::now());
    }

    pub(crate) fn attach_observer(&self, observer: Arc<dyn Observer>) {
        let mut inner = self.lock();
        assert!(
            inner.state < TaskState::Executing,
            "cannot attach observer to task `{}` after execution has begun",
            self.name
        );
        inner.observers.push(observer);
    }

    pub(crate) fn add_dependency(&self, dependency: TaskHandle) {
        let mut inner = self.lock();
        assert!(
            inner.state == TaskState::Initialized,
            "cannot add dependency to task `{}` after submission",
            self.name
        );
        inner.dependencies.push(dependency);
    }

    pub(crate) fn observers(&self) -> Vec<Arc<dyn Observer>> {
        self.lock().observers.clone()
    }

    /// Terminal transition. Idempotent: only the first caller runs the
    /// `Finishing -> Finished` sequence and notifies observers; later calls
    /// are absorbed.
    pub(crate) fn finish(self: &Arc<Self>, received: Vec<TaskError>) {
        let handle = TaskHandle {
            core: Arc::clone(self),
        };
        let cancelled = self.is_cancelled();
        let (observers, errors) = {
            let mut inner = self.lock();
            if inner.has_finished {
                return;
            }
            inner.has_finished = true;
            inner.state = inner
                .state
                .transition_to(TaskState::Finishing, cancelled, &self.name);
            inner.errors.extend(received);
            (inner.observers.clone(), inner.errors.clone())
        };

        for observer in &observers {
            observer.will_finish(&handle, &errors);
        }

        {
            let mut inner = self.lock();
            inner.state = inner
                .state
                .transition_to(TaskState::Finished, cancelled, &self.name);
            inner.finished_at = Some(Utc::now());
        }
        self.finished_tx.send_replace(true);

        if errors.is_empty() {
            debug!("task `{}` finished", self.name);
        } else {
            warn!("task `{}` finished with {} errors", self.name, errors.len());
        }

        for observer in &observers {
            observer.on_finish(&handle, &errors);
        }
    }

    fn cancel_with_errors(&self, errors: Vec<TaskError>) {
        {
            let mut inner = self.lock();
            // Errors are frozen once finished; a late cancel is a no-op.
            if inner.has_finished {
                return;
            }
            if !errors.is_empty() {
                warn!("task `{}` cancelled with errors: {:?}", self.name, errors);
                inner.errors.extend(errors);
            }
        }
        if !*self.cancel_tx.borrow() {
            trace!("task `{}` cancelled", self.name);
            self.cancel_tx.send_replace(true);
        }
    }
}

/// A unit of asynchronous work, before submission to a [`TaskQueue`].
///
/// In this phase the task owns its body, conditions and dependencies; the
/// condition set becomes immutable once the queue takes ownership at
/// submission.
pub struct Task {
    core: Arc<TaskCore>,
    work: Box<dyn Work>,
    conditions: Vec<Arc<dyn Condition>>,
}

impl Task {
    pub fn new(name: impl Into<String>, work: impl Work) -> Self {
        Self {
            core: Arc::new(TaskCore::new(name.into())),
            work: Box::new(work),
            conditions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// A lightweight handle usable to observe, cancel or depend on this task.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Attaches a pre-condition. Only legal before submission.
    pub fn add_condition(&mut self, condition: impl Condition + 'static) {
        assert!(
            self.core.lock().state == TaskState::Initialized,
            "cannot add condition to task `{}` after submission",
            self.core.name
        );
        self.conditions.push(Arc::new(condition));
    }

    /// Attaches a lifecycle observer. Only legal before execution begins.
    pub fn add_observer(&mut self, observer: impl Observer + 'static) {
        self.core.attach_observer(Arc::new(observer));
    }

    /// Makes this task wait for `dependency` to finish before it may become
    /// ready. Only legal before submission.
    pub fn add_dependency(&mut self, dependency: TaskHandle) {
        self.core.add_dependency(dependency);
    }

    pub fn cancel(&self) {
        self.core.cancel_with_errors(Vec::new());
    }

    pub(crate) fn into_parts(self) -> (Arc<TaskCore>, Box<dyn Work>, Vec<Arc<dyn Condition>>) {
        (self.core, self.work, self.conditions)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}

/// Cheap cloneable handle onto a task.
///
/// Handles never own the queue or the body, so observers and dependents can
/// hold them without creating reference cycles back into the scheduler.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) core: Arc<TaskCore>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> TaskState {
        self.core.lock().state
    }

    /// The accumulated error list. Frozen once the task finishes.
    pub fn errors(&self) -> Vec<TaskError> {
        self.core.lock().errors.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Whether the body was actually invoked. False for tasks that finished
    /// on the precondition path.
    pub fn did_execute(&self) -> bool {
        self.core.lock().did_execute
    }

    pub fn dependencies(&self) -> Vec<TaskHandle> {
        self.core.lock().dependencies.clone()
    }

    /// Sets the cancelled flag. Never transitions state synchronously and
    /// never interrupts a running body; the task still reaches `Finished`
    /// through the standard path, it just never executes (or, if already
    /// executing, the body is expected to notice and return).
    pub fn cancel(&self) {
        self.core.cancel_with_errors(Vec::new());
    }

    /// Cancels, first appending `error` to the task's error list.
    pub fn cancel_with_error(&self, error: TaskError) {
        self.core.cancel_with_errors(vec![error]);
    }

    /// Finishes the task with the given errors.
    ///
    /// Idempotent: the terminal transition and observer notifications happen
    /// exactly once no matter how many times (or from how many threads) this
    /// is called. Calling it on a task that is neither cancelled, ready nor
    /// executing is a scheduler-level bug and aborts.
    pub fn finish(&self, errors: Vec<TaskError>) {
        self.core.finish(errors);
    }

    /// Resolves once the task is finished, yielding its final error list.
    pub async fn wait(&self) -> Vec<TaskError> {
        let mut rx = self.core.finished_tx.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
        self.errors()
    }

    /// Resolves when the task is cancelled; pends forever otherwise.
    pub(crate) async fn wait_cancelled(&self) {
        let mut rx = self.core.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// A serializable snapshot for diagnostics.
    pub fn report(&self) -> TaskReport {
        let inner = self.core.lock();
        TaskReport {
            id: self.core.id,
            name: self.core.name.clone(),
            state: inner.state,
            cancelled: self.core.is_cancelled(),
            did_execute: inner.did_execute,
            errors: inner.errors.clone(),
            created_at: inner.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Body-side interface handed to [`Work::perform`].
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) handle: TaskHandle,
    pub(crate) queue: TaskQueue,
}

impl TaskContext {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Resolves when the task is cancelled. Intended for
    /// `tokio::select!`-style cooperative bodies.
    pub async fn cancelled(&self) {
        self.handle.wait_cancelled().await;
    }

    /// Submits `task` to the same queue this task is running on.
    ///
    /// Produced tasks are not dependencies of the producer; the producer's
    /// observers see the production event in order, before the producer's
    /// finish event.
    pub fn produce(&self, task: Task) -> TaskHandle {
        assert!(
            self.handle.state() >= TaskState::Pending,
            "task `{}` cannot produce work before being scheduled",
            self.handle.name()
        );
        let produced = task.handle();
        debug!(
            "task `{}` produced task `{}`",
            self.handle.name(),
            produced.name()
        );
        for observer in self.handle.core.observers() {
            observer.on_produce(&self.handle, &produced);
        }
        self.queue.submit(task)
    }
}

/// Point-in-time snapshot of a task, for diagnostics export.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub cancelled: bool,
    pub did_execute: bool,
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskReport {
    /// Wall-clock execution time, if the task both started and finished.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => (finished - started).to_std().ok(),
            _ => None,
        }
    }
}
