// ABOUTME: Task module: state machine, errors, observers and built-in bodies
// ABOUTME: Exposes the task handle API used by the engine, conditions and retry

pub mod block;
pub mod core;
pub mod error;
pub mod observer;
pub mod state;

pub use block::{BlockWork, DelayWork};
pub use core::{Task, TaskContext, TaskHandle, TaskId, TaskReport, Work};
pub use error::TaskError;
pub use observer::{
    FinishObserver, Observer, ProduceObserver, StartObserver, TimeoutObserver, TracingObserver,
    WillFinishObserver,
};
pub use state::TaskState;
