//! Application state wiring all services together.
//!
//! AppState pins the generic chat service to the SQLite repository and
//! builds one breaker-guarded backend per configured provider.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;

use parley_core::cache::TtlCache;
use parley_core::chat::service::ChatService;
use parley_core::llm::selector::{Backend, ProviderSelector};
use parley_core::resilience::{BreakerPolicy, RetryPolicy};
use parley_infra::llm::{create_provider, resolve_api_key};
use parley_infra::sqlite::message::SqliteMessageRepository;
use parley_infra::sqlite::pool::{ConnectionPool, PoolOptions};
use parley_types::chat::ChatMessage;
use parley_types::config::{ParleyConfig, ProviderSettings, ResilienceConfig};

pub type ConcreteChatService = ChatService<SqliteMessageRepository>;

/// Shared application state for CLI commands.
pub struct AppState {
    pub config: ParleyConfig,
    pub pool: ConnectionPool,
    pub selector: Arc<ProviderSelector>,
    pub chat_service: ConcreteChatService,
    pub history_cache: Arc<TtlCache<Vec<ChatMessage>>>,
}

impl AppState {
    /// Open the database and build the provider selector and chat service.
    ///
    /// The primary provider's API key is required. A secondary whose key is
    /// missing is skipped with a warning and the selector runs single-backend.
    pub async fn init(config: ParleyConfig) -> anyhow::Result<Self> {
        let repo = open_storage(&config).await?;
        let pool = repo.pool().clone();

        let primary = build_backend(&config.providers.primary, &config.resilience)
            .with_context(|| format!("primary provider '{}'", config.providers.primary.name))?;
        let secondary = match &config.providers.secondary {
            Some(settings) => match build_backend(settings, &config.resilience) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(
                        provider = %settings.name,
                        error = %e,
                        "secondary provider unavailable, running without fallback"
                    );
                    None
                }
            },
            None => None,
        };

        // No generation cache: every chat turn carries a new history.
        let selector = Arc::new(ProviderSelector::new(
            primary,
            secondary,
            RetryPolicy::from_config(&config.resilience),
        ));

        let capacity = NonZeroUsize::new(config.resilience.cache_capacity)
            .context("cache_capacity must be greater than zero")?;
        let history_cache = Arc::new(TtlCache::new(capacity, config.resilience.default_ttl));

        let chat_service = ChatService::new(repo, Arc::clone(&selector), Arc::clone(&history_cache));

        Ok(Self {
            config,
            pool,
            selector,
            chat_service,
            history_cache,
        })
    }

    /// Close pooled connections before exit.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

/// Open the connection pool and make sure the schema exists.
///
/// Commands that only read history use this without touching providers.
pub async fn open_storage(config: &ParleyConfig) -> anyhow::Result<SqliteMessageRepository> {
    let pool = ConnectionPool::connect(PoolOptions::from_config(config))
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path.display()))?;
    let repo = SqliteMessageRepository::new(pool);
    repo.ensure_schema().await?;
    Ok(repo)
}

fn build_backend(settings: &ProviderSettings, resilience: &ResilienceConfig) -> anyhow::Result<Backend> {
    let api_key = resolve_api_key(settings)?;
    let provider = create_provider(settings, api_key)?;
    let policy = BreakerPolicy::from(resilience.breaker_for(&settings.name));
    Ok(Backend::new(provider, policy))
}
