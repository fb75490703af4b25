//! Provider selection with a single fallback hop.
//!
//! Each request is routed to one backend by policy (content class), then
//! executed as `with_retry(breaker.call(provider.generate))`. If that path
//! ends with an open breaker or exhausted transient retries and an alternate
//! backend exists, the alternate gets exactly one try, wrapped in its own
//! retry and breaker. Fallback never chains further.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use parley_types::error::DependencyError;
use parley_types::llm::{Completion, ContentClass, GenerateOptions, Message};

use super::box_provider::BoxLlmProvider;
use crate::cache::TtlCache;
use crate::resilience::breaker::{BreakerPolicy, BreakerSnapshot, CircuitBreaker};
use crate::resilience::retry::{RetryPolicy, with_retry};

/// A provider paired with the breaker that guards it.
#[derive(Debug)]
pub struct Backend {
    provider: BoxLlmProvider,
    breaker: Arc<CircuitBreaker>,
}

impl Backend {
    /// Guard `provider` with a fresh breaker named after it.
    pub fn new(provider: BoxLlmProvider, policy: BreakerPolicy) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(provider.name(), policy));
        Self { provider, breaker }
    }

    /// Guard `provider` with an existing (possibly shared) breaker.
    pub fn with_breaker(provider: BoxLlmProvider, breaker: Arc<CircuitBreaker>) -> Self {
        Self { provider, breaker }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub options: GenerateOptions,
    pub content_class: ContentClass,
    /// When set (and the selector has a cache), identical requests are
    /// served from the cache.
    pub cache_key: Option<String>,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_content_class(mut self, content_class: ContentClass) -> Self {
        self.content_class = content_class;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Result of a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub token_count: u32,
    /// Name of the backend that produced the text.
    pub provider: String,
    /// True when the routed backend failed and the alternate answered.
    pub fell_back: bool,
    pub cached: bool,
    pub failover_warning: Option<String>,
}

impl Generation {
    fn from_completion(completion: Completion, provider: &str) -> Self {
        Self {
            text: completion.text,
            token_count: completion.token_count,
            provider: provider.to_string(),
            fell_back: false,
            cached: false,
            failover_warning: None,
        }
    }
}

/// Health of one backend: live probe plus breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub role: &'static str,
    pub reachable: bool,
    pub latency_ms: u64,
    pub breaker: BreakerSnapshot,
}

/// Routes generation requests across a primary and an optional secondary
/// backend.
#[derive(Debug)]
pub struct ProviderSelector {
    primary: Backend,
    secondary: Option<Backend>,
    retry: RetryPolicy,
    cache: Option<Arc<TtlCache<Generation>>>,
}

impl ProviderSelector {
    pub fn new(primary: Backend, secondary: Option<Backend>, retry: RetryPolicy) -> Self {
        Self {
            primary,
            secondary,
            retry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TtlCache<Generation>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn primary(&self) -> &Backend {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Backend> {
        self.secondary.as_ref()
    }

    /// Pick the backend for a content class, plus the alternate allowed
    /// for a fallback hop.
    ///
    /// Restricted content goes to the secondary and never falls back to the
    /// primary, which is not permitted to serve it. Without a secondary,
    /// everything goes to the primary.
    pub fn route(&self, content_class: ContentClass) -> (&Backend, Option<&Backend>) {
        match (content_class, self.secondary.as_ref()) {
            (ContentClass::Restricted, Some(secondary)) => (secondary, None),
            (_, secondary) => (&self.primary, secondary),
        }
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Generation, DependencyError> {
        if let Some(hit) = self.cached(request) {
            return Ok(hit);
        }

        let (chosen, alternate) = self.route(request.content_class);
        let generation = match self.attempt(chosen, request).await {
            Ok(completion) => Generation::from_completion(completion, chosen.name()),
            Err(primary_err) => {
                let alternate = match alternate {
                    Some(alt) if primary_err.triggers_failover() => alt,
                    _ => return Err(primary_err),
                };
                tracing::warn!(
                    from = %chosen.name(),
                    to = %alternate.name(),
                    error = %primary_err,
                    "provider failed, falling back"
                );
                match self.attempt(alternate, request).await {
                    Ok(completion) => {
                        let mut generation =
                            Generation::from_completion(completion, alternate.name());
                        generation.fell_back = true;
                        generation.failover_warning = Some(format!(
                            "{} is unavailable; response generated by {}",
                            chosen.name(),
                            alternate.name()
                        ));
                        generation
                    }
                    Err(fallback_err) => {
                        tracing::error!(
                            primary = %chosen.name(),
                            fallback = %alternate.name(),
                            primary_error = %primary_err,
                            fallback_error = %fallback_err,
                            "fallback provider also failed"
                        );
                        return Err(DependencyError::Unavailable {
                            primary: Box::new(primary_err),
                            fallback: Box::new(fallback_err),
                        });
                    }
                }
            }
        };

        if let (Some(cache), Some(key)) = (&self.cache, &request.cache_key) {
            cache.set(key.as_str(), generation.clone());
        }
        Ok(generation)
    }

    /// Probe every backend and pair the result with its breaker state.
    pub async fn health_status(&self) -> Vec<BackendHealth> {
        let mut out = Vec::with_capacity(2);
        out.push(Self::probe(&self.primary, "primary").await);
        if let Some(secondary) = &self.secondary {
            out.push(Self::probe(secondary, "secondary").await);
        }
        out
    }

    /// Whether the primary's breaker is currently admitting calls.
    pub fn primary_available(&self) -> bool {
        !self.primary.breaker.is_open()
    }

    async fn attempt(
        &self,
        backend: &Backend,
        request: &GenerateRequest,
    ) -> Result<Completion, DependencyError> {
        with_retry(&self.retry, || {
            backend.breaker.call(|| async {
                backend
                    .provider
                    .generate(&request.messages, &request.options)
                    .await
                    .map_err(|e| e.into_dependency(backend.name()))
            })
        })
        .await
    }

    fn cached(&self, request: &GenerateRequest) -> Option<Generation> {
        let cache = self.cache.as_ref()?;
        let key = request.cache_key.as_deref()?;
        let mut hit = cache.get(key)?;
        hit.cached = true;
        tracing::debug!(key, provider = %hit.provider, "generation served from cache");
        Some(hit)
    }

    async fn probe(backend: &Backend, role: &'static str) -> BackendHealth {
        let started = Instant::now();
        let reachable = backend.provider.health().await;
        BackendHealth {
            name: backend.name().to_string(),
            role,
            reachable,
            latency_ms: started.elapsed().as_millis() as u64,
            breaker: backend.breaker.snapshot(),
        }
    }
}
