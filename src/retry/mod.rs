// ABOUTME: Retry module: wait strategies, retry/repeat controllers and the
// ABOUTME: network-aware recovery policy

pub mod controller;
pub mod recovery;
pub mod wait;

pub use controller::{FailureInfo, Payload, RepeatController, RepeatOutcome, RetryController};
pub use recovery::{classify, ErrorDisposition, NetworkRecovery};
pub use wait::WaitStrategy;
