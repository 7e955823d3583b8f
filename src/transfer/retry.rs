//! Retry with exponential backoff
//!
//! The only place transient-failure recovery is decided. Providers report
//! failures; [`Retrier`] decides whether to try again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::control::TransferControl;
use crate::provider::{OperationResult, ProviderError};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Fraction of the delay that may be randomly shaved off (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set custom backoff parameters
    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1)
    }
}

/// Backoff before retry number `attempt` (1-based), without jitter
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exp = attempt.saturating_sub(1).min(63);
    let delay = policy
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
    Duration::from_millis(delay.min(policy.max_delay_ms))
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
    delay.mul_f64(factor)
}

/// Backend-supplied "is this failure transient?" check
pub type RetryPredicate = Arc<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Runs an operation under a [`RetryPolicy`]
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    predicate: Option<RetryPredicate>,
    control: Option<Arc<TransferControl>>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: None,
            control: None,
        }
    }

    /// Replace the default predicate (the error's own `retryable` flag)
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_control(mut self, control: Arc<TransferControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, err: &ProviderError) -> bool {
        if err.kind().is_terminal() {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(err),
            None => err.retryable(),
        }
    }

    /// Execute `op`, retrying transient failures with exponential backoff.
    ///
    /// Returns the last failure once attempts are exhausted or the failure
    /// is not retryable. Cancellation during a backoff sleep yields
    /// `Cancelled`.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OperationResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= max_attempts || !self.should_retry(&err) {
                if attempt > 1 {
                    debug!("{} giving up after {} attempt(s): {}", op_name, attempt, err);
                }
                return Err(err);
            }

            let delay = jittered(backoff_delay(attempt, &self.policy), self.policy.jitter);
            warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                op_name, attempt, max_attempts, err, delay
            );

            match &self.control {
                Some(ctrl) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctrl.cancelled() => {
                            return Err(ProviderError::cancelled(format!(
                                "{} cancelled during retry backoff",
                                op_name
                            )));
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", &self.policy)
            .field("custom_predicate", &self.predicate.is_some())
            .field("cancellable", &self.control.is_some())
            .finish()
    }
}
