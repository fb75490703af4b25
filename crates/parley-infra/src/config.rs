//! Configuration loader for Parley.
//!
//! Reads `parley.toml` and deserializes it into [`ParleyConfig`]. Falls back
//! to defaults when the file is missing or malformed, then applies
//! `PARLEY_<OPTION>` environment overrides for the resilience options.

use std::path::Path;
use std::time::Duration;

use parley_types::config::{ParleyConfig, ResilienceConfig};
use parley_types::error::ConfigError;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "parley.toml";

/// Load configuration from `path`, apply environment overrides, validate.
///
/// - If the file does not exist, defaults are used.
/// - If the file exists but fails to parse, logs a warning and uses defaults.
/// - A malformed environment override or an invalid final value is an error.
pub async fn load_config(path: &Path) -> Result<ParleyConfig, ConfigError> {
    let mut config = read_config_file(path).await;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

async fn read_config_file(path: &Path) -> ParleyConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return ParleyConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return ParleyConfig::default();
        }
    };

    match toml::from_str::<ParleyConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            ParleyConfig::default()
        }
    }
}

/// Apply `PARLEY_<OPTION>` overrides from the process environment.
pub fn apply_env_overrides(config: &mut ParleyConfig) -> Result<(), ConfigError> {
    apply_overrides_from(&mut config.resilience, |name| std::env::var(name).ok())
}

/// Apply overrides using `lookup` to read variables (injectable for tests).
pub fn apply_overrides_from(
    resilience: &mut ResilienceConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = parse_var(&lookup, "PARLEY_FAILURE_THRESHOLD", "failure_threshold")? {
        resilience.failure_threshold = v;
    }
    if let Some(v) = parse_secs(&lookup, "PARLEY_RECOVERY_TIMEOUT", "recovery_timeout")? {
        resilience.recovery_timeout = v;
    }
    if let Some(v) = parse_var(&lookup, "PARLEY_MAX_RETRIES", "max_retries")? {
        resilience.max_retries = v;
    }
    if let Some(v) = parse_secs(&lookup, "PARLEY_BASE_DELAY", "base_delay")? {
        resilience.base_delay = v;
    }
    if let Some(v) = parse_secs(&lookup, "PARLEY_MAX_DELAY", "max_delay")? {
        resilience.max_delay = v;
    }
    if let Some(v) = parse_var(&lookup, "PARLEY_CACHE_CAPACITY", "cache_capacity")? {
        resilience.cache_capacity = v;
    }
    if let Some(v) = parse_secs(&lookup, "PARLEY_DEFAULT_TTL", "default_ttl")? {
        resilience.default_ttl = v;
    }
    if let Some(v) = parse_var(&lookup, "PARLEY_POOL_SIZE", "pool_size")? {
        resilience.pool_size = v;
    }
    if let Some(v) = parse_secs(&lookup, "PARLEY_ACQUIRE_TIMEOUT", "acquire_timeout")? {
        resilience.acquire_timeout = v;
    }
    Ok(())
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    field: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: format!("{var}={raw:?}: {e}"),
        })
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    field: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(secs) = parse_var::<f64>(lookup, var, field)? else {
        return Ok(None);
    };
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: format!("{var}={secs}: {e}"),
        })
}
