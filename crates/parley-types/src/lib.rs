//! Shared domain types for Parley.
//!
//! This crate contains the types used across the Parley workspace: the
//! dependency error taxonomy, generation messages, chat messages, and the
//! configuration structs.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
