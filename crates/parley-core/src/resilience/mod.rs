//! Failure isolation for calls to external dependencies.
//!
//! Compose as `with_retry(&policy, || breaker.call(op))`: the breaker sits
//! inside the retry loop so every attempt is admitted (or rejected) on its
//! own, and an open breaker ends the loop immediately.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerPolicy, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, with_retry};
