//! Convergence loop primitives.
//!
//! This library provides helpers for loops that drive an external resource
//! toward a desired state. Key concepts:
//!
//! - **Retry policy**: How many times a whole reconciliation attempt may run,
//!   and how long to back off between attempts.
//! - **Poll policy**: How often, and how many times, to observe a resource
//!   while waiting for it to settle.
//! - **Convergence**: What a single observation says about the resource.
//!
//! # Invariants
//!
//! - Delays are only taken between attempts, never after the last one
//! - Backoff delays grow monotonically with the attempt number
//! - Every wait is bounded; exhaustion is reported as [`WaitError::Timeout`]
//! - Time is injected through [`Sleeper`], so schedules are testable without delay

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors raised by bounded waits.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The poll budget ran out before convergence.
    #[error("timed out after {attempts} polls waiting for {resource}")]
    Timeout { resource: String, attempts: u32 },

    /// The resource reached a state it cannot converge from.
    #[error("{resource} can no longer converge: {reason}")]
    Diverged { resource: String, reason: String },

    /// Observing the resource failed.
    #[error("check failed while waiting for {resource}: {source}")]
    Check {
        resource: String,
        #[source]
        source: E,
    },
}

impl<E> WaitError<E> {
    /// Returns true if the wait ran out of polls.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the check error, if the wait failed on one.
    pub fn check_error(&self) -> Option<&E> {
        match self {
            Self::Check { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// What a single observation says about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence<T> {
    /// Resource has converged; carries the observed value.
    Converged(T),

    /// Resource is still moving toward the desired state.
    Converging,

    /// Resource has reached a state it will not recover from.
    Diverged(String),
}

// =============================================================================
// Time
// =============================================================================

/// Source of delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that records every requested delay and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Create a new recording sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn durations(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.durations().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Exponential backoff: the delay after attempt `n` is `base^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: u64,
}

impl ExponentialBackoff {
    /// Create a backoff with the given base, in seconds.
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    /// The base in seconds.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Delay to take after the 1-indexed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base.saturating_pow(attempt))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY_BASE)
    }
}

/// Retry budget for whole attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Backoff between attempts.
    pub backoff: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Delay to take after the 1-indexed attempt `attempt` before the next one.
    ///
    /// Returns `None` when `attempt` was the last allowed attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.backoff.delay_for(attempt))
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Bounded polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between observations.
    pub interval: Duration,

    /// Maximum number of observations.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a poll policy.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Derive the observation count from an overall deadline.
    ///
    /// Always allows at least one observation.
    pub fn from_timeout(interval: Duration, timeout: Duration) -> Self {
        let max_attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_millis() / interval.as_millis()).clamp(1, u32::MAX as u128) as u32
        };
        Self::new(interval, max_attempts)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_timeout(DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT)
    }
}

/// Observe a resource until it converges, diverges, or the poll budget runs out.
///
/// `check` is called at most `policy.max_attempts` times, with
/// `policy.interval` between calls.
pub async fn wait_for<T, E, F, Fut>(
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    resource: &str,
    mut check: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Convergence<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        let observed = check().await.map_err(|source| WaitError::Check {
            resource: resource.to_string(),
            source,
        })?;

        match observed {
            Convergence::Converged(value) => {
                debug!(resource, attempt, "Resource converged");
                return Ok(value);
            }
            Convergence::Diverged(reason) => {
                return Err(WaitError::Diverged {
                    resource: resource.to_string(),
                    reason,
                });
            }
            Convergence::Converging => {
                debug!(
                    resource,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Resource still converging"
                );
            }
        }

        if attempt < policy.max_attempts {
            sleeper.sleep(policy.interval).await;
        }
    }

    Err(WaitError::Timeout {
        resource: resource.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Default number of reconciliation attempts.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default backoff base, in seconds.
pub const DEFAULT_RETRY_DELAY_BASE: u64 = 2;

/// Default delay between observations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for a bounded wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
