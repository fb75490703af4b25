//! Bounded retry with exponential backoff.
//!
//! Only `DependencyError::Transient` is retried. Permanent failures, open
//! breakers and pool exhaustion end the loop on first occurrence.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use parley_types::config::ResilienceConfig;
use parley_types::error::DependencyError;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Shave 0-10% off each delay so synchronized callers drift apart.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.max_delay).with_jitter(config.jitter)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after failed attempt `attempt` (1-based):
    /// `min(base_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        if self.jitter {
            delay.mul_f64(1.0 - fastrand::f64() * 0.1)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Bookkeeping for one logical call.
#[derive(Debug)]
struct RetryContext<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl<'a> RetryContext<'a> {
    fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
        }
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Decide what to do with a failed attempt: wait and go again, or stop
    /// with the terminal error.
    fn on_error(&mut self, err: DependencyError) -> ControlFlow<DependencyError, Duration> {
        if !err.is_retryable() {
            return ControlFlow::Break(err);
        }
        if self.attempt >= self.policy.max_attempts {
            tracing::warn!(
                dependency = err.dependency().unwrap_or("unknown"),
                attempts = self.attempt,
                error = %err,
                "retries exhausted"
            );
            return ControlFlow::Break(err);
        }

        let backoff = self.policy.delay_for(self.attempt);
        // A server-requested wait wins over our own schedule, but never
        // beyond max_delay.
        let delay = match err.retry_after() {
            Some(requested) => requested.max(backoff).min(self.policy.max_delay),
            None => backoff,
        };
        tracing::warn!(
            dependency = err.dependency().unwrap_or("unknown"),
            attempt = self.attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        ControlFlow::Continue(delay)
    }
}

/// Invoke `op` until it succeeds, fails non-transiently, or runs out of
/// attempts. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, DependencyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DependencyError>>,
{
    let mut ctx = RetryContext::new(policy);
    loop {
        ctx.begin_attempt();
        match op().await {
            Ok(value) => {
                if ctx.attempt > 1 {
                    tracing::debug!(attempt = ctx.attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match ctx.on_error(err) {
                ControlFlow::Continue(delay) => tokio::time::sleep(delay).await,
                ControlFlow::Break(terminal) => return Err(terminal),
            },
        }
    }
}
