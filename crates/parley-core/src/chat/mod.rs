//! Conversation persistence port and the chat service that drives the
//! resilience substrate.

pub mod repository;
pub mod service;
