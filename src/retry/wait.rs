// ABOUTME: Backoff wait strategies: pure formulas from attempt index to delay
// ABOUTME: Used by the retry and repeat controllers between attempts

use std::time::Duration;

use rand::Rng;

/// Strategy for computing the delay before re-running work.
///
/// Stateless: the delay is a pure function of the attempt index `n`
/// (starting at 0 for the delay preceding the first resubmission).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitStrategy {
    /// No delay between attempts.
    Immediate,
    /// The same delay every time.
    Fixed(Duration),
    /// `initial + n * increment`.
    Incrementing {
        initial: Duration,
        increment: Duration,
    },
    /// `base * multiplier^n`.
    Exponential { base: Duration, multiplier: f64 },
    /// Uniformly random between `min` and `max`.
    Random { min: Duration, max: Duration },
}

impl WaitStrategy {
    /// The delay for attempt index `n`.
    pub fn delay(&self, n: u32) -> Duration {
        match *self {
            WaitStrategy::Immediate => Duration::ZERO,
            WaitStrategy::Fixed(delay) => delay,
            WaitStrategy::Incrementing { initial, increment } => initial + increment * n,
            WaitStrategy::Exponential { base, multiplier } => {
                Duration::from_secs_f64(base.as_secs_f64() * multiplier.powi(n as i32))
            }
            WaitStrategy::Random { min, max } => {
                if max <= min {
                    return min;
                }
                let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
        }
    }
}
