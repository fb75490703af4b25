//! Per-dependency circuit breaker.
//!
//! States and transitions:
//! - `Closed` (initial): calls pass through. Each transient failure bumps
//!   `failure_count`; reaching `failure_threshold` opens the circuit.
//! - `Open`: calls are rejected with `DependencyError::BreakerOpen` without
//!   invoking the operation. Once `recovery_timeout` has elapsed since
//!   `open_since`, the next caller moves the breaker to `HalfOpen`.
//! - `HalfOpen`: exactly one trial call is admitted; concurrent callers are
//!   rejected. Trial success closes the circuit, trial failure reopens it
//!   with a fresh `open_since`.
//!
//! All state lives behind one mutex that is never held across an await.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use parley_types::config::BreakerSettings;
use parley_types::error::DependencyError;

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl BreakerPolicy {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

impl From<BreakerSettings> for BreakerPolicy {
    fn from(settings: BreakerSettings) -> Self {
        Self::new(settings.failure_threshold, settings.recovery_timeout)
    }
}

/// Point-in-time view of a breaker, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub secs_since_last_failure: Option<f64>,
    pub secs_since_opened: Option<f64>,
    pub last_error: Option<String>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    open_since: Option<Instant>,
    trial_in_flight: bool,
    last_error: Option<String>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            open_since: None,
            trial_in_flight: false,
            last_error: None,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }
}

enum Outcome {
    Success,
    Failure(String),
    /// Permanent errors say nothing about the dependency's health.
    Neutral,
}

/// A circuit breaker guarding a single named dependency.
///
/// Construct one per dependency and share it (`Arc<CircuitBreaker>`) among
/// every caller of that dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `op`'s result, or `BreakerOpen` without calling `op` at all.
    /// Only transient errors count as failures.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let mut permit = self.admit()?;
        let result = op().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.counts_against_breaker() => Outcome::Failure(e.to_string()),
            Err(_) => Outcome::Neutral,
        };
        permit.settle(outcome);
        result
    }

    /// Current state, applying the Open -> HalfOpen transition if due.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.policy.failure_threshold,
            recovery_timeout_secs: self.policy.recovery_timeout.as_secs_f64(),
            secs_since_last_failure: inner
                .last_failure_time
                .map(|t| now.duration_since(t).as_secs_f64()),
            secs_since_opened: inner.open_since.map(|t| now.duration_since(t).as_secs_f64()),
            last_error: inner.last_error.clone(),
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }

    /// Force the breaker back to `Closed`. Counters are kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.open_since = None;
        inner.trial_in_flight = false;
        tracing::info!(dependency = %self.name, "circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere while holding the lock cannot leave it half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let Some(opened) = inner.open_since else {
            return;
        };
        if now.duration_since(opened) >= self.policy.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            tracing::info!(dependency = %self.name, "circuit breaker half-open, allowing a trial call");
        }
    }

    fn admit(&self) -> Result<Permit<'_>, DependencyError> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        let state = inner.state;
        let trial = match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.rejected_calls += 1;
                tracing::debug!(dependency = %self.name, %state, "call rejected by open circuit");
                return Err(DependencyError::breaker_open(&self.name));
            }
        };
        inner.total_calls += 1;
        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, trial: bool, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        match outcome {
            Outcome::Success => {
                // A straggler admitted before the circuit opened does not
                // get to close it; only the trial decides recovery.
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                } else if trial {
                    self.close(&mut inner);
                }
            }
            Outcome::Failure(message) => {
                inner.total_failures += 1;
                inner.last_failure_time = Some(now);
                inner.last_error = Some(message);
                let state = inner.state;
                match state {
                    CircuitState::Closed => {
                        inner.failure_count += 1;
                        if inner.failure_count >= self.policy.failure_threshold {
                            self.open(&mut inner, now);
                        }
                    }
                    CircuitState::HalfOpen if trial => {
                        inner.failure_count += 1;
                        self.open(&mut inner, now);
                    }
                    CircuitState::HalfOpen | CircuitState::Open => {}
                }
            }
            Outcome::Neutral => {
                // The dependency answered, so a trial that was rejected
                // downstream still proves it is reachable.
                if trial && inner.state == CircuitState::HalfOpen {
                    self.close(&mut inner);
                }
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.open_since = Some(now);
        tracing::warn!(
            dependency = %self.name,
            failures = inner.failure_count,
            recovery_timeout_secs = self.policy.recovery_timeout.as_secs_f64(),
            "circuit breaker opened"
        );
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.open_since = None;
        tracing::info!(dependency = %self.name, "circuit breaker closed, dependency recovered");
    }
}

/// Admission ticket for one call.
///
/// Dropping an unsettled trial permit (the caller was cancelled mid-call)
/// frees the half-open slot so a later caller can run the trial.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.trial, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        let mut inner = self.breaker.lock();
        inner.trial_in_flight = false;
        tracing::debug!(dependency = %self.breaker.name, "half-open trial abandoned");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "gemini",
            BreakerPolicy::new(threshold, Duration::from_secs(recovery_secs)),
        )
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DependencyError> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DependencyError::transient("gemini", "timeout"))
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DependencyError> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_skips_operation() {
        let b = breaker(3, 60);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(fail(&b, &calls).await.is_err());
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = succeed(&b, &calls).await.unwrap_err();
        assert!(matches!(err, DependencyError::BreakerOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "operation must not run");
        assert_eq!(b.snapshot().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_stays_closed() {
        let b = breaker(3, 60);
        let calls = AtomicU32::new(0);

        fail(&b, &calls).await.unwrap_err();
        fail(&b, &calls).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 2);

        succeed(&b, &calls).await.unwrap();
        assert_eq!(b.snapshot().failure_count, 0, "success resets the streak");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout_and_trial_success_closes() {
        let b = breaker(2, 30);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await.unwrap_err();
        fail(&b, &calls).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        succeed(&b, &calls).await.unwrap();
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_open_since() {
        let b = breaker(1, 10);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(15)).await;
        fail(&b, &calls).await.unwrap_err();

        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.secs_since_opened, Some(0.0));

        // The new recovery window starts at the failed trial.
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_in_half_open() {
        let b = Arc::new(breaker(1, 5));
        let calls = Arc::new(AtomicU32::new(0));
        fail(&b, &calls).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(5)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = Arc::clone(&b);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                b.call(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.await;
                    Ok::<_, DependencyError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        let err = succeed(&b, &calls).await.unwrap_err();
        assert!(matches!(err, DependencyError::BreakerOpen { .. }));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_the_slot() {
        let b = Arc::new(breaker(1, 5));
        let calls = Arc::new(AtomicU32::new(0));
        fail(&b, &calls).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.call(|| std::future::pending::<Result<(), DependencyError>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        trial.abort();
        let _ = trial.await;

        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b, &calls).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_count() {
        let b = breaker(2, 60);
        for _ in 0..5 {
            let err = b
                .call(|| async { Err::<(), _>(DependencyError::permanent("gemini", "400")) })
                .await
                .unwrap_err();
            assert!(matches!(err, DependencyError::Permanent { .. }));
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().total_failures, 0);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let b = breaker(1, 3600);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await.unwrap_err();
        assert!(b.is_open());

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        succeed(&b, &calls).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_records_last_error() {
        let b = breaker(5, 60);
        let calls = AtomicU32::new(0);
        fail(&b, &calls).await.unwrap_err();

        let snap = b.snapshot();
        assert_eq!(snap.name, "gemini");
        assert_eq!(snap.total_calls, 1);
        assert_eq!(snap.total_failures, 1);
        assert!(snap.last_error.unwrap().contains("timeout"));
        assert!(snap.secs_since_last_failure.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_exactly_once() {
        let b = Arc::new(breaker(10, 60));
        let calls = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let b = Arc::clone(&b);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move { fail(&b, &calls).await }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
