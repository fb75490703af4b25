//! Infrastructure layer for Parley.
//!
//! Contains the adapters behind the ports defined in `parley-core`: the
//! SQLite connection pool and message repository, the Gemini and OpenRouter
//! provider clients, and the TOML configuration loader.

pub mod config;
pub mod llm;
pub mod sqlite;
