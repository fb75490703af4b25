//! Resilience substrate and business logic for Parley.
//!
//! This crate defines the circuit breaker, retry policy, TTL cache and
//! provider selector that every external call passes through, plus the
//! "ports" (repository and provider traits) that the infrastructure layer
//! implements. It depends only on `parley-types` and tokio's time/sync
//! primitives -- never on `parley-infra` or any database/HTTP crate.

pub mod cache;
pub mod chat;
pub mod llm;
pub mod resilience;
