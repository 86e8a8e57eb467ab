// ABOUTME: Main library module for the foreman task-scheduling engine
// ABOUTME: Exports all core modules and provides the public API

pub mod condition;
pub mod engine;
pub mod reachability;
pub mod retry;
pub mod task;

// Re-export commonly used types
pub use condition::{
    BlockCondition, Condition, ConditionResult, MutuallyExclusive, NoFailedDependencies,
    ReachabilityCondition,
};
pub use engine::{ExclusivityManager, QueueDelegate, QueueStats, TaskQueue};
pub use reachability::{Connectivity, NetworkStatus, ReachabilityGate, ReachabilityMonitor};
pub use retry::{
    FailureInfo, NetworkRecovery, Payload, RepeatController, RetryController, WaitStrategy,
};
pub use task::{
    Observer, Task, TaskContext, TaskError, TaskHandle, TaskId, TaskReport, TaskState,
    TimeoutObserver, TracingObserver, Work,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
