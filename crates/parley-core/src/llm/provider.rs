//! LlmProvider trait definition.
//!
//! The capability every generation backend exposes. Implementations live
//! in parley-infra (`GeminiProvider`, `OpenRouterProvider`).

use std::future::Future;

use parley_types::llm::{Completion, GenerateOptions, LlmError, Message};

/// Trait for text-generation backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Errors must
/// distinguish transient from permanent failures (`LlmError::is_transient`)
/// so the retry layer knows what is worth repeating.
pub trait LlmProvider: Send + Sync {
    /// Dependency name (e.g. "gemini", "openrouter"). Also names the breaker.
    fn name(&self) -> &str;

    /// Generate a reply to `messages`.
    fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<Completion, LlmError>> + Send;

    /// Cheap reachability probe. Never errors; unreachable is `false`.
    fn health(&self) -> impl Future<Output = bool> + Send;
}
