//! Generation provider abstraction and the failover-aware selector.

pub mod box_provider;
pub mod provider;
pub mod selector;

/// Rough token estimate for responses without usage data: 1.3 tokens per
/// whitespace-separated word, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    (words * 1.3).ceil() as u32
}
