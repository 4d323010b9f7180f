//! Configuration loading: file, then environment, then validation.

use crate::config::{LogFormat, RouterConfig, MAX_KEY_SLOTS};
use crate::error::ConfigError;
use gateway_core::ProviderId;
use secrecy::SecretString;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use validator::Validate;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

/// Load configuration from an optional file plus the process environment.
///
/// A missing `path` yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let format = ConfigFormat::from_path(path)?;
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_config(&contents, format).map_err(|message| ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            })?
        }
        None => RouterConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse configuration text in the given format
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<RouterConfig, String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
    }
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Recognised variables:
/// - `ROUTER_DEADLINE_MS`, `ROUTER_MIN_ATTEMPT_MS`, `ROUTER_HEDGE_AFTER_MS`
/// - `ROUTER_LOG_LEVEL`, `ROUTER_LOG_FORMAT`
/// - `<PROVIDER>_ENABLED`
/// - API keys from each provider's key variable and its `_2`/`_3` siblings,
///   when the file did not list literal keys
pub fn apply_env_overrides<F>(config: &mut RouterConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(ms) = read_parsed::<u64>(&lookup, "ROUTER_DEADLINE_MS")? {
        config.execution.deadline = Duration::from_millis(ms);
    }
    if let Some(ms) = read_parsed::<u64>(&lookup, "ROUTER_MIN_ATTEMPT_MS")? {
        config.execution.min_attempt_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = read_parsed::<u64>(&lookup, "ROUTER_HEDGE_AFTER_MS")? {
        config.execution.hedge_after = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(level) = lookup("ROUTER_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
        config.telemetry.log_level = level;
    }
    if let Some(format) = lookup("ROUTER_LOG_FORMAT") {
        config.telemetry.log_format = match format.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::InvalidEnv {
                    name: "ROUTER_LOG_FORMAT".to_string(),
                    value: format,
                })
            }
        };
    }

    for provider in ProviderId::ALL {
        let enabled_var = format!("{}_ENABLED", provider.as_str().to_ascii_uppercase());
        if let Some(enabled) = read_bool(&lookup, &enabled_var)? {
            config.providers.get_mut(provider).enabled = enabled;
        }

        let settings = config.providers.get_mut(provider);
        if settings.keys.is_empty() {
            let base = settings.effective_key_env(provider);
            settings.keys = key_var_names(&base)
                .iter()
                .filter_map(|name| lookup(name.as_str()))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(SecretString::new)
                .collect();
        }

        if settings.enabled && settings.keys.is_empty() {
            warn!(provider = %provider, "Provider enabled but no API keys configured");
        } else {
            debug!(provider = %provider, key_slots = settings.keys.len(), "Resolved API key slots");
        }
    }

    Ok(())
}

/// Validate field ranges and cross-field rules
pub fn validate_config(config: &RouterConfig) -> Result<(), ConfigError> {
    config.validate()?;

    for provider in ProviderId::ALL {
        let slots = config.providers.get(provider).keys.len();
        if slots > MAX_KEY_SLOTS {
            return Err(ConfigError::Validation(format!(
                "providers.{provider}.keys has {slots} entries; at most {MAX_KEY_SLOTS} key slots are supported"
            )));
        }
    }

    if config.classifier.medium_chars >= config.classifier.high_chars {
        return Err(ConfigError::Validation(format!(
            "classifier.medium_chars ({}) must be below classifier.high_chars ({})",
            config.classifier.medium_chars, config.classifier.high_chars
        )));
    }
    if config.execution.deadline.is_zero() {
        return Err(ConfigError::Validation(
            "execution.deadline must be greater than zero".to_string(),
        ));
    }
    if let Some(hedge) = config.execution.hedge_after {
        if hedge >= config.execution.deadline {
            return Err(ConfigError::Validation(
                "execution.hedge_after must be shorter than execution.deadline".to_string(),
            ));
        }
    }
    if config.health.min_requests > config.health.error_window {
        return Err(ConfigError::Validation(
            "health.min_requests cannot exceed health.error_window".to_string(),
        ));
    }

    Ok(())
}

/// Environment variable names for the key slots of `base`
#[must_use]
pub fn key_var_names(base: &str) -> Vec<String> {
    (1..=MAX_KEY_SLOTS)
        .map(|slot| {
            if slot == 1 {
                base.to_string()
            } else {
                format!("{base}_{slot}")
            }
        })
        .collect()
}

fn read_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
    }
}

fn read_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<bool>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        },
    }
}
