//! Observability for Parley: tracing subscriber setup.

pub mod tracing_setup;
