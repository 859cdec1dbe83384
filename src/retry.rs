// src/retry.rs

//! Retry policies.
//!
//! A policy is a small stateless value the engine consults after a failed
//! attempt: [`RetryPolicy::should_retry`] decides whether another attempt is
//! allowed, [`RetryPolicy::backoff`] decides how long the next attempt waits
//! before its body runs. Swapping policies never touches the engine.

use std::fmt::Debug;
use std::time::Duration;

use crate::config::RetrySection;
use crate::dag::{FailureKind, TaskSpec, TaskState};
use crate::types::RetryStrategyKind;

/// Strategy deciding whether and when a failed task is attempted again.
pub trait RetryPolicy: Send + Sync + Debug {
    /// `state.attempt` is the number of attempts already made.
    fn should_retry(&self, state: &TaskState, spec: &TaskSpec) -> bool {
        let retryable = state
            .last_error
            .as_ref()
            .map(|e| e.kind != FailureKind::Cancelled)
            .unwrap_or(true);
        retryable && state.attempt < spec.max_attempts
    }

    /// Delay before attempt number `attempt + 1`, given `attempt` failures so far.
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Never retry, regardless of `max_attempts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _state: &TaskState, _spec: &TaskSpec) -> bool {
        false
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Retry up to `max_attempts` with the same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RetryPolicy for FixedDelay {
    fn backoff(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Retry up to `max_attempts` with `base * multiplier^(attempt - 1)`, capped.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base,
            multiplier,
            max_delay,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Build the policy selected by the `[retry]` config section.
pub fn from_config(section: &RetrySection) -> Box<dyn RetryPolicy> {
    match section.strategy {
        RetryStrategyKind::None => Box::new(NoRetry),
        RetryStrategyKind::Fixed => Box::new(FixedDelay::new(section.delay.as_duration())),
        RetryStrategyKind::Exponential => Box::new(ExponentialBackoff::new(
            section.delay.as_duration(),
            section.multiplier,
            section.max_delay.as_duration(),
        )),
    }
}
