use thiserror::Error;

/// Generic text shown to end users when a dependency is unavailable.
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "The service is temporarily unavailable. Please try again in a moment.";

/// Generic text shown to end users when a request was rejected downstream.
pub const REQUEST_REJECTED_MESSAGE: &str = "The request could not be processed.";

/// Failure of an external dependency (provider, embedded store).
///
/// The variants drive the resilience layer:
/// - `Transient` is retried by the retry policy and counts against the breaker.
/// - `Permanent` is never retried and never triggers a fallback hop.
/// - `BreakerOpen` is a fast-fail; never retried, but triggers a fallback hop.
/// - `PoolExhausted` is a bounded-wait failure from the connection pool.
/// - `Unavailable` aggregates a failed primary path with a failed fallback hop.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("{dependency}: transient failure: {message}")]
    Transient {
        dependency: String,
        message: String,
        /// Server-requested wait before the next attempt (e.g. `Retry-After`).
        retry_after_ms: Option<u64>,
    },

    #[error("{dependency}: permanent failure: {message}")]
    Permanent { dependency: String, message: String },

    #[error("circuit breaker for '{dependency}' is open")]
    BreakerOpen { dependency: String },

    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("all providers failed (primary: {primary}; fallback: {fallback})")]
    Unavailable {
        primary: Box<DependencyError>,
        fallback: Box<DependencyError>,
    },
}

impl DependencyError {
    pub fn transient(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            dependency: dependency.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// A transient failure carrying the server's requested back-off.
    pub fn rate_limited(
        dependency: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        Self::Transient {
            dependency: dependency.into(),
            message: message.into(),
            retry_after_ms,
        }
    }

    pub fn permanent(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    pub fn breaker_open(dependency: impl Into<String>) -> Self {
        Self::BreakerOpen {
            dependency: dependency.into(),
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the provider selector should try the alternate backend.
    ///
    /// Exhausted transient failures and open breakers fail over; permanent
    /// failures (bad request, auth) would fail the same way elsewhere.
    pub fn triggers_failover(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::BreakerOpen { .. })
    }

    /// Whether a circuit breaker should record this outcome as a failure.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Minimum wait the dependency asked for before the next attempt.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Transient {
                retry_after_ms: Some(ms),
                ..
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Name of the dependency that produced the error, if there is one.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Transient { dependency, .. }
            | Self::Permanent { dependency, .. }
            | Self::BreakerOpen { dependency } => Some(dependency),
            Self::PoolExhausted { .. } => Some("connection_pool"),
            Self::Unavailable { .. } => None,
        }
    }

    /// Text safe to show an end user. Never includes provider detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Permanent { .. } => REQUEST_REJECTED_MESSAGE,
            _ => SERVICE_UNAVAILABLE_MESSAGE,
        }
    }
}

/// Errors from repository operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Unavailable(#[from] DependencyError),
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing environment variable '{0}'")]
    MissingEnv(String),
}
