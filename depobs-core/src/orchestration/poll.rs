//! Fixed-interval polling primitive shared by the job watcher and the result
//! reconciler.

use std::future::Future;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// `(initial delay, interval, optional max attempts)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// `None` polls until the check reports ready or errors.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn unbounded(initial_delay: Duration, interval: Duration) -> Self {
        Self {
            initial_delay,
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending,
}

/// Runs `check` after `initial_delay` and then every `interval` until it
/// reports [`PollOutcome::Ready`]. Errors from `check` abort the loop.
///
/// The check receives the 1-based attempt number. `what` only feeds the
/// [`OrchestratorError::PollExhausted`] message.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>>>,
{
    if !policy.initial_delay.is_zero() {
        tokio::time::sleep(policy.initial_delay).await;
    }

    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        if let PollOutcome::Ready(value) = check(attempt).await? {
            return Ok(value);
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                return Err(OrchestratorError::PollExhausted {
                    what: what.to_string(),
                    attempts: attempt,
                });
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}
