//! Configuration types for Parley.
//!
//! `ParleyConfig` represents the top-level `parley.toml`. Every field has a
//! default so an empty file (or no file at all) yields a working setup.
//! Durations are written as (fractional) seconds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::ProviderKind;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ParleyConfig {
    /// Reject values the resilience layer cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resilience;
        if r.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if r.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if r.base_delay > r.max_delay {
            return Err(invalid(
                "base_delay",
                format!("{:?} exceeds max_delay {:?}", r.base_delay, r.max_delay),
            ));
        }
        if r.cache_capacity == 0 {
            return Err(invalid("cache_capacity", "must be at least 1"));
        }
        if r.pool_size == 0 {
            return Err(invalid("pool_size", "must be at least 1"));
        }
        for (name, over) in &r.breakers {
            if over.failure_threshold == Some(0) {
                return Err(invalid(
                    "breakers.failure_threshold",
                    format!("override for '{name}' must be at least 1"),
                ));
            }
        }
        if self.database.write_retry_attempts == 0 {
            return Err(invalid("write_retry_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// The recognized resilience options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive transient failures before a breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker rejects calls before allowing a trial.
    #[serde(default = "default_recovery_timeout", with = "duration_secs")]
    pub recovery_timeout: Duration,

    /// Total invocations allowed per logical call (first attempt included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay", with = "duration_secs")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,

    /// Shave up to 10% off each backoff delay to spread out retries.
    #[serde(default)]
    pub jitter: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_ttl", with = "duration_secs")]
    pub default_ttl: Duration,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_acquire_timeout", with = "duration_secs")]
    pub acquire_timeout: Duration,

    /// Per-dependency breaker overrides keyed by dependency name.
    #[serde(default)]
    pub breakers: HashMap<String, BreakerOverride>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
            cache_capacity: default_cache_capacity(),
            default_ttl: default_ttl(),
            pool_size: default_pool_size(),
            acquire_timeout: default_acquire_timeout(),
            breakers: HashMap::new(),
        }
    }
}

impl ResilienceConfig {
    /// Breaker settings for a dependency, applying any override.
    pub fn breaker_for(&self, dependency: &str) -> BreakerSettings {
        let over = self.breakers.get(dependency);
        BreakerSettings {
            failure_threshold: over
                .and_then(|o| o.failure_threshold)
                .unwrap_or(self.failure_threshold),
            recovery_timeout: over
                .and_then(|o| o.recovery_timeout)
                .unwrap_or(self.recovery_timeout),
        }
    }
}

/// Resolved breaker settings for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

/// Optional per-dependency breaker settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default, with = "opt_duration_secs")]
    pub recovery_timeout: Option<Duration>,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_capacity() -> usize {
    250
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_pool_size() -> usize {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Embedded store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// SQLite's own busy-wait before it reports SQLITE_BUSY.
    #[serde(default = "default_busy_timeout", with = "duration_secs")]
    pub busy_timeout: Duration,

    /// Attempts for a write that keeps hitting busy/locked.
    #[serde(default = "default_write_retry_attempts")]
    pub write_retry_attempts: u32,

    #[serde(default = "default_write_retry_base_delay", with = "duration_secs")]
    pub write_retry_base_delay: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout: default_busy_timeout(),
            write_retry_attempts: default_write_retry_attempts(),
            write_retry_base_delay: default_write_retry_base_delay(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/parley.db")
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_write_retry_attempts() -> u32 {
    5
}

fn default_write_retry_base_delay() -> Duration {
    Duration::from_millis(50)
}

/// The two interchangeable generation backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_primary")]
    pub primary: ProviderSettings,
    #[serde(default = "default_secondary")]
    pub secondary: Option<ProviderSettings>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

fn default_primary() -> ProviderSettings {
    ProviderSettings {
        name: "gemini".to_string(),
        kind: ProviderKind::Gemini,
        model: "gemini-2.5-flash".to_string(),
        base_url: None,
        api_key_env: "GEMINI_API_KEY".to_string(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        timeout: default_provider_timeout(),
    }
}

fn default_secondary() -> Option<ProviderSettings> {
    Some(ProviderSettings {
        name: "openrouter".to_string(),
        kind: ProviderKind::OpenRouter,
        model: "google/gemini-2.5-flash".to_string(),
        base_url: None,
        api_key_env: "OPENROUTER_API_KEY".to_string(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        timeout: default_provider_timeout(),
    })
}

/// Settings for one provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Dependency name; also the key for breaker overrides.
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    /// Override the provider's default API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_provider_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Serde adapter: `Duration` as (fractional) seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: ParleyConfig = toml::from_str("").unwrap();
        let r = &config.resilience;
        assert_eq!(r.failure_threshold, 3);
        assert_eq!(r.recovery_timeout, Duration::from_secs(60));
        assert_eq!(r.max_retries, 3);
        assert_eq!(r.base_delay, Duration::from_secs(1));
        assert_eq!(r.max_delay, Duration::from_secs(30));
        assert_eq!(r.cache_capacity, 250);
        assert_eq!(r.default_ttl, Duration::from_secs(300));
        assert_eq!(r.pool_size, 10);
        assert_eq!(r.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.providers.primary.kind, ProviderKind::Gemini);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_resilience_section() {
        let toml_str = r#"
[resilience]
failure_threshold = 5
recovery_timeout = 30
max_retries = 4
base_delay = 0.5
max_delay = 8
cache_capacity = 100
default_ttl = 120
pool_size = 4
acquire_timeout = 2.5

[resilience.breakers.storage]
failure_threshold = 5
recovery_timeout = 15

[database]
path = "/tmp/parley.db"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let r = &config.resilience;
        assert_eq!(r.failure_threshold, 5);
        assert_eq!(r.base_delay, Duration::from_millis(500));
        assert_eq!(r.acquire_timeout, Duration::from_millis(2500));
        assert_eq!(r.pool_size, 4);
        assert_eq!(config.database.path, PathBuf::from("/tmp/parley.db"));

        let storage = r.breaker_for("storage");
        assert_eq!(storage.failure_threshold, 5);
        assert_eq!(storage.recovery_timeout, Duration::from_secs(15));

        let gemini = r.breaker_for("gemini");
        assert_eq!(gemini.failure_threshold, 5);
        assert_eq!(gemini.recovery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override_falls_back_to_global() {
        let toml_str = r#"
[resilience]
failure_threshold = 3
recovery_timeout = 60

[resilience.breakers.openrouter]
failure_threshold = 7
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let settings = config.resilience.breaker_for("openrouter");
        assert_eq!(settings.failure_threshold, 7);
        assert_eq!(settings.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = ParleyConfig::default();
        config.resilience.pool_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = ParleyConfig::default();
        config.resilience.base_delay = Duration::from_secs(60);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_delay"));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let result: Result<ParleyConfig, _> = toml::from_str("[resilience]\nbase_delay = -1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_secondary_can_be_configured() {
        let toml_str = r#"
[providers.primary]
name = "gemini"
kind = "gemini"
model = "gemini-2.5-pro"
api_key_env = "GEMINI_API_KEY"

[providers.secondary]
name = "openrouter"
kind = "openrouter"
model = "meta-llama/llama-3.1-70b-instruct"
api_key_env = "OPENROUTER_API_KEY"
timeout = 45
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let secondary = config.providers.secondary.unwrap();
        assert_eq!(secondary.kind, ProviderKind::OpenRouter);
        assert_eq!(secondary.timeout, Duration::from_secs(45));
        assert!((secondary.temperature - 0.7).abs() < f32::EPSILON);
    }
}
