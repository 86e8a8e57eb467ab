// ABOUTME: The scheduling queue: wires conditions into the dependency graph,
// ABOUTME: registers exclusivity and drives execution on a bounded worker pool

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::debug;

use super::delegate::QueueDelegate;
use super::exclusivity::ExclusivityManager;
use crate::condition::{evaluate_conditions, Condition};
use crate::task::core::TaskCore;
use crate::task::observer::Observer;
use crate::task::{FinishObserver, Task, TaskContext, TaskError, TaskHandle, TaskState, Work};

struct QueueInner {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    exclusivity: Arc<ExclusivityManager>,
    delegate: RwLock<Option<Arc<dyn QueueDelegate>>>,
    active_tx: watch::Sender<usize>,
}

/// Accepts tasks and drives them through their lifecycle on the tokio
/// runtime, with execution bounded by a worker-pool semaphore.
///
/// `submit` returns immediately; every effect is asynchronous. Cloning the
/// queue is cheap and clones share the same pool, exclusivity registry and
/// delegate.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// A queue executing at most `max_concurrent` task bodies at once, with
    /// its own exclusivity registry.
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_exclusivity(max_concurrent, Arc::new(ExclusivityManager::new()))
    }

    /// A queue sharing `exclusivity` with other queues, so categories are
    /// honored across all of them.
    pub fn with_exclusivity(max_concurrent: usize, exclusivity: Arc<ExclusivityManager>) -> Self {
        assert!(max_concurrent > 0, "queue needs at least one worker");
        let (active_tx, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(QueueInner {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                exclusivity,
                delegate: RwLock::new(None),
                active_tx,
            }),
        }
    }

    /// Sets the delegate informed of task outcomes. Takes effect for
    /// subsequently submitted tasks.
    pub fn set_delegate(&self, delegate: Arc<dyn QueueDelegate>) {
        *self
            .inner
            .delegate
            .write()
            .expect("queue delegate lock poisoned") = Some(delegate);
    }

    fn delegate(&self) -> Option<Arc<dyn QueueDelegate>> {
        self.inner
            .delegate
            .read()
            .expect("queue delegate lock poisoned")
            .clone()
    }

    /// Submits a task for execution and returns its handle. Never blocks:
    /// dependency waits, condition evaluation and execution all happen on
    /// the runtime.
    ///
    /// Condition-contributed prerequisite tasks are added as hard
    /// dependencies and submitted recursively; mutual-exclusion categories
    /// are registered (serializing against the previous registrant) and
    /// deregistered again once the task finishes.
    pub fn submit(&self, task: Task) -> TaskHandle {
        let handle = task.handle();
        debug!("submitting task `{}`", handle.name());

        if let Some(delegate) = self.delegate() {
            delegate.will_add(self, &handle);
        }

        let (core, work, conditions) = task.into_parts();

        // Observer relaying finish events to the delegate and releasing the
        // queue's in-flight accounting.
        core.attach_observer(Arc::new(QueueObserver {
            queue: self.clone(),
        }));

        // Conditions may contribute prerequisite tasks.
        for condition in &conditions {
            if let Some(prerequisite) = condition.dependency(&handle) {
                debug!(
                    "condition `{}` added prerequisite `{}` for task `{}`",
                    condition.name(),
                    prerequisite.name(),
                    handle.name()
                );
                core.add_dependency(prerequisite.handle());
                self.submit(prerequisite);
            }
        }

        // Mutual exclusion: serialize against the previous registrant of
        // each category via ordinary dependency edges.
        let categories: Vec<String> = conditions
            .iter()
            .filter(|condition| condition.is_mutually_exclusive())
            .map(|condition| condition.category().to_string())
            .collect();
        if !categories.is_empty() {
            for previous in self.inner.exclusivity.register(&handle, &categories) {
                core.add_dependency(previous);
            }
            let exclusivity = Arc::clone(&self.inner.exclusivity);
            core.attach_observer(Arc::new(FinishObserver::new(
                move |task: &TaskHandle, _errors: &[TaskError]| {
                    exclusivity.deregister(task.id(), &categories);
                },
            )));
        }

        self.inner.active_tx.send_modify(|active| *active += 1);
        core.transition(TaskState::Pending);

        let queue = self.clone();
        tokio::spawn(async move {
            drive(queue, core, work, conditions).await;
        });

        handle
    }

    /// Resolves once no submitted task is pending or running.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.active_tx.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    /// Snapshot of pool usage.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.inner.max_concurrent,
            available_permits: self.inner.semaphore.available_permits(),
            in_flight: *self.inner.active_tx.borrow(),
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("in_flight", &*self.inner.active_tx.borrow())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    /// Tasks submitted but not yet finished (waiting, evaluating or running).
    pub in_flight: usize,
}

struct QueueObserver {
    queue: TaskQueue,
}

impl Observer for QueueObserver {
    fn will_finish(&self, task: &TaskHandle, errors: &[TaskError]) {
        if let Some(delegate) = self.queue.delegate() {
            delegate.will_finish(&self.queue, task, errors);
        }
    }

    fn on_finish(&self, task: &TaskHandle, errors: &[TaskError]) {
        if let Some(delegate) = self.queue.delegate() {
            delegate.did_finish(&self.queue, task, errors);
        }
        self.queue
            .inner
            .active_tx
            .send_modify(|active| *active = active.saturating_sub(1));
    }
}

/// Per-task driver: the event-driven equivalent of readiness polling.
///
/// Pending → wait for hard dependencies (racing cancellation; a cancelled
/// pending task force-finishes without touching its conditions) →
/// EvaluatingConditions (every condition, exactly once) → Ready → execution
/// gate → Executing → Finishing → Finished.
async fn drive(
    queue: TaskQueue,
    core: Arc<TaskCore>,
    work: Box<dyn Work>,
    conditions: Vec<Arc<dyn Condition>>,
) {
    let handle = TaskHandle {
        core: Arc::clone(&core),
    };

    let dependencies = handle.dependencies();
    if !dependencies.is_empty() && !handle.is_cancelled() {
        let all_finished = join_all(dependencies.iter().map(|dependency| dependency.wait()));
        tokio::select! {
            _ = all_finished => {}
            _ = handle.wait_cancelled() => {}
        }
    }

    // Cancelled before conditions ran: force-finish straight from Pending.
    if handle.is_cancelled() {
        core.finish(Vec::new());
        return;
    }

    core.transition(TaskState::EvaluatingConditions);
    let failures = evaluate_conditions(&conditions, &handle).await;
    core.append_errors(failures);
    core.transition(TaskState::Ready);

    // Execution gate: a doomed task should not occupy a worker.
    if !handle.errors().is_empty() || handle.is_cancelled() {
        core.finish(Vec::new());
        return;
    }

    let _permit = Arc::clone(&queue.inner.semaphore)
        .acquire_owned()
        .await
        .expect("worker pool semaphore closed");

    // Re-check: cancellation may have arrived while waiting for a worker.
    if !handle.errors().is_empty() || handle.is_cancelled() {
        core.finish(Vec::new());
        return;
    }

    core.mark_executing();
    for observer in core.observers() {
        observer.on_start(&handle);
    }

    let ctx = TaskContext {
        handle: handle.clone(),
        queue,
    };
    match work.perform(&ctx).await {
        Ok(()) => core.finish(Vec::new()),
        Err(error) => core.finish(vec![error]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::condition::{BlockCondition, ConditionResult, MutuallyExclusive};
    use crate::task::{StartObserver, TaskError, TimeoutObserver};

    fn queue() -> TaskQueue {
        TaskQueue::new(4)
    }

    #[tokio::test]
    async fn test_plain_task_runs_through_full_lifecycle() {
        let queue = queue();
        let seen_executing = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&seen_executing);

        let mut task = Task::block("plain", |ctx| async move {
            assert_eq!(ctx.handle().state(), TaskState::Executing);
            Ok(())
        });
        task.add_observer(StartObserver::new(move |task: &TaskHandle| {
            assert_eq!(task.state(), TaskState::Executing);
            seen.store(true, Ordering::SeqCst);
        }));

        let handle = queue.submit(task);
        let errors = handle.wait().await;

        assert!(errors.is_empty());
        assert_eq!(handle.state(), TaskState::Finished);
        assert!(handle.did_execute());
        assert!(seen_executing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_under_concurrent_calls() {
        let queue = queue();
        let finish_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finish_count);

        let mut task = Task::block("finish-many", |ctx| async move {
            let handle = ctx.handle().clone();
            let calls: Vec<_> = (0..8)
                .map(|_| {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        handle.finish(Vec::new());
                    })
                })
                .collect();
            for call in calls {
                call.await.expect("finish call panicked");
            }
            Ok(())
        });
        task.add_observer(FinishObserver::new(
            move |_task: &TaskHandle, _errors: &[TaskError]| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let handle = queue.submit(task);
        handle.wait().await;
        // Give any straggling (absorbed) finish calls a chance to misbehave.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(finish_count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_dependency_finishes_before_dependent_starts() {
        let queue = queue();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_first = Arc::clone(&order);
        let first = Task::block("first", move |_ctx| {
            let order = Arc::clone(&order_first);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                order.lock().unwrap().push("first");
                Ok(())
            }
        });

        let order_second = Arc::clone(&order);
        let mut second = Task::block("second", move |_ctx| {
            let order = Arc::clone(&order_second);
            async move {
                order.lock().unwrap().push("second");
                Ok(())
            }
        });

        let first_handle = queue.submit(first);
        second.add_dependency(first_handle);
        let second_handle = queue.submit(second);

        second_handle.wait().await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    struct PrerequisiteCondition {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Condition for PrerequisiteCondition {
        fn name(&self) -> &str {
            "needs-setup"
        }

        fn dependency(&self, _task: &TaskHandle) -> Option<Task> {
            let ran = Arc::clone(&self.ran);
            Some(Task::block("setup", move |_ctx| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }))
        }

        async fn evaluate(&self, _task: &TaskHandle) -> ConditionResult {
            ConditionResult::Satisfied
        }
    }

    #[tokio::test]
    async fn test_condition_prerequisite_runs_before_dependent() {
        let queue = queue();
        let setup_ran = Arc::new(AtomicBool::new(false));

        let ran_at_execution = Arc::new(AtomicBool::new(false));
        let setup_probe = Arc::clone(&setup_ran);
        let probe = Arc::clone(&ran_at_execution);
        let mut task = Task::block("guarded", move |_ctx| {
            let setup = Arc::clone(&setup_probe);
            let probe = Arc::clone(&probe);
            async move {
                probe.store(setup.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            }
        });
        task.add_condition(PrerequisiteCondition {
            ran: Arc::clone(&setup_ran),
        });

        let handle = queue.submit(task);
        let errors = handle.wait().await;

        assert!(errors.is_empty());
        // The prerequisite had finished before the guarded body ran.
        assert!(ran_at_execution.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_condition_blocks_body_with_only_that_error() {
        let queue = queue();
        let body_ran = Arc::new(AtomicBool::new(false));
        let setup_ran = Arc::new(AtomicBool::new(false));

        let probe = Arc::clone(&body_ran);
        let mut task = Task::block("denied", move |_ctx| {
            let probe = Arc::clone(&probe);
            async move {
                probe.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        task.add_condition(BlockCondition::new("denied-check", |_task| async {
            ConditionResult::Failed(TaskError::RequirementNotSatisfied("no access".into()))
        }));
        task.add_condition(PrerequisiteCondition {
            ran: Arc::clone(&setup_ran),
        });

        let handle = queue.submit(task);
        let errors = handle.wait().await;

        assert!(!body_ran.load(Ordering::SeqCst));
        assert!(!handle.did_execute());
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            TaskError::ConditionFailed { condition, .. } => assert_eq!(condition, "denied-check"),
            other => panic!("expected ConditionFailed, got {other:?}"),
        }
        assert_eq!(handle.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_exclusive_category_never_overlaps_and_runs_fifo() {
        let queue = queue();
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for index in 0..4 {
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            let order = Arc::clone(&order);
            let mut task = Task::block(format!("exclusive-{index}"), move |_ctx| {
                let running = Arc::clone(&running);
                let max_running = Arc::clone(&max_running);
                let order = Arc::clone(&order);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    order.lock().unwrap().push(index);
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            });
            task.add_condition(MutuallyExclusive::new("database"));
            handles.push(queue.submit(task));
        }

        for handle in &handles {
            handle.wait().await;
        }

        assert_eq!(max_running.load(Ordering::SeqCst), 1, "overlapping execution");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3], "not FIFO");
    }

    #[tokio::test]
    async fn test_cancelled_before_conditions_never_evaluates_them() {
        let queue = queue();
        let evaluated = Arc::new(AtomicBool::new(false));
        let body_ran = Arc::new(AtomicBool::new(false));

        let probe = Arc::clone(&body_ran);
        let mut task = Task::block("cancelled-early", move |_ctx| {
            let probe = Arc::clone(&probe);
            async move {
                probe.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        let evaluated_probe = Arc::clone(&evaluated);
        task.add_condition(BlockCondition::new("never-evaluated", move |_task| {
            let evaluated = Arc::clone(&evaluated_probe);
            async move {
                evaluated.store(true, Ordering::SeqCst);
                ConditionResult::Satisfied
            }
        }));

        // A dependency that never finishes keeps the task in Pending until
        // cancellation arrives.
        let blocker = Task::block("blocker", |ctx| async move {
            ctx.cancelled().await;
            Ok(())
        });
        let blocker_handle = queue.submit(blocker);
        task.add_dependency(blocker_handle.clone());

        let handle = queue.submit(task);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        let errors = handle.wait().await;

        assert!(errors.is_empty());
        assert_eq!(handle.state(), TaskState::Finished);
        assert!(!evaluated.load(Ordering::SeqCst), "condition was evaluated");
        assert!(!body_ran.load(Ordering::SeqCst));
        assert!(!handle.did_execute());

        blocker_handle.cancel();
        blocker_handle.wait().await;
    }

    #[tokio::test]
    async fn test_cancelled_ready_task_skips_body_but_notifies_observers() {
        let queue = TaskQueue::new(1);
        let finish_seen = Arc::new(AtomicBool::new(false));

        // Occupy the single worker so the second task waits in Ready.
        let hog = queue.submit(Task::block("hog", |_ctx| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }));

        let body_ran = Arc::new(AtomicBool::new(false));
        let probe = Arc::clone(&body_ran);
        let seen = Arc::clone(&finish_seen);
        let mut task = Task::block("cancelled-ready", move |_ctx| {
            let probe = Arc::clone(&probe);
            async move {
                probe.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        task.add_observer(FinishObserver::new(
            move |_task: &TaskHandle, _errors: &[TaskError]| {
                seen.store(true, Ordering::SeqCst);
            },
        ));

        let handle = queue.submit(task);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        handle.wait().await;

        assert!(!body_ran.load(Ordering::SeqCst));
        assert!(!handle.did_execute());
        assert!(finish_seen.load(Ordering::SeqCst));
        hog.wait().await;
    }

    #[tokio::test]
    async fn test_produced_task_is_submitted_and_observed() {
        let queue = queue();
        let produced_seen = Arc::new(AtomicBool::new(false));
        let produced_done = Arc::new(AtomicBool::new(false));

        let done = Arc::clone(&produced_done);
        let mut producer = Task::block("producer", move |ctx| {
            let done = Arc::clone(&done);
            async move {
                let child = Task::block("child", move |_ctx| {
                    let done = Arc::clone(&done);
                    async move {
                        done.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                });
                let child_handle = ctx.produce(child);
                child_handle.wait().await;
                Ok(())
            }
        });
        let seen = Arc::clone(&produced_seen);
        producer.add_observer(crate::task::ProduceObserver::new(
            move |_task: &TaskHandle, produced: &TaskHandle| {
                assert_eq!(produced.name(), "child");
                seen.store(true, Ordering::SeqCst);
            },
        ));

        let handle = queue.submit(producer);
        let errors = handle.wait().await;

        assert!(errors.is_empty());
        assert!(produced_seen.load(Ordering::SeqCst));
        assert!(produced_done.load(Ordering::SeqCst));
    }

    struct RecordingDelegate {
        events: Mutex<Vec<String>>,
    }

    impl QueueDelegate for RecordingDelegate {
        fn will_add(&self, _queue: &TaskQueue, task: &TaskHandle) {
            self.events
                .lock()
                .unwrap()
                .push(format!("will_add:{}", task.name()));
        }

        fn will_finish(&self, _queue: &TaskQueue, task: &TaskHandle, _errors: &[TaskError]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("will_finish:{}", task.name()));
        }

        fn did_finish(&self, _queue: &TaskQueue, task: &TaskHandle, errors: &[TaskError]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("did_finish:{}:{}", task.name(), errors.len()));
        }
    }

    #[tokio::test]
    async fn test_delegate_sees_add_and_finish_in_order() {
        let queue = queue();
        let delegate = Arc::new(RecordingDelegate {
            events: Mutex::new(Vec::new()),
        });
        queue.set_delegate(Arc::clone(&delegate) as Arc<dyn QueueDelegate>);

        let handle = queue.submit(Task::block("watched", |_ctx| async {
            Err(TaskError::Unknown("boom".into()))
        }));
        handle.wait().await;
        queue.wait_until_idle().await;

        let events = delegate.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "will_add:watched".to_string(),
                "will_finish:watched".to_string(),
                "did_finish:watched:1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_until_idle_waits_for_all_tasks() {
        let queue = queue();
        let done = Arc::new(AtomicUsize::new(0));
        for index in 0..6 {
            let done = Arc::clone(&done);
            queue.submit(Task::block(format!("busy-{index}"), move |_ctx| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }
        queue.wait_until_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let queue = TaskQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..6 {
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            handles.push(queue.submit(Task::block(format!("bounded-{index}"), move |_ctx| {
                let running = Arc::clone(&running);
                let max_running = Arc::clone(&max_running);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })));
        }
        for handle in &handles {
            handle.wait().await;
        }
        assert!(max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_observer_cancels_overdue_task() {
        let queue = queue();
        let mut task = Task::block("slow", |ctx| async move {
            // Cooperative body: returns once cancelled.
            ctx.cancelled().await;
            Ok(())
        });
        task.add_observer(TimeoutObserver::new(Duration::from_millis(20)));

        let handle = queue.submit(task);
        let errors = handle.wait().await;

        assert!(handle.is_cancelled());
        assert!(matches!(errors[0], TaskError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_timeout_observer_leaves_fast_task_alone() {
        let queue = queue();
        let mut task = Task::block("fast", |_ctx| async { Ok(()) });
        task.add_observer(TimeoutObserver::new(Duration::from_secs(5)));

        let handle = queue.submit(task);
        let errors = handle.wait().await;

        assert!(errors.is_empty());
        assert!(!handle.is_cancelled());
    }
}
