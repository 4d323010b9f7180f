//! Typed router configuration.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a working configuration once API keys are supplied.

use gateway_core::{ComplexityTier, ProviderId, TokenPricing};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Maximum API key slots per provider
pub const MAX_KEY_SLOTS: usize = 3;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-provider settings
    #[validate(nested)]
    pub providers: ProvidersConfig,

    /// Tier preference table
    #[validate(nested)]
    pub routing: RoutingConfig,

    /// Classification thresholds
    #[validate(nested)]
    pub classifier: ClassifierConfig,

    /// Deadlines and hedging
    #[validate(nested)]
    pub execution: ExecutionConfig,

    /// Health tracking and key rotation
    #[validate(nested)]
    pub health: HealthConfig,

    /// Logging and recorder sinks
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Per-provider price overrides
    pub pricing: BTreeMap<ProviderId, TokenPricing>,
}

/// Settings for all known providers
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Cerebras
    #[validate(nested)]
    pub cerebras: ProviderConfig,
    /// Gemini
    #[validate(nested)]
    pub gemini: ProviderConfig,
    /// Groq
    #[validate(nested)]
    pub groq: ProviderConfig,
}

impl ProvidersConfig {
    /// Settings for one provider
    #[must_use]
    pub fn get(&self, provider: ProviderId) -> &ProviderConfig {
        match provider {
            ProviderId::Cerebras => &self.cerebras,
            ProviderId::Gemini => &self.gemini,
            ProviderId::Groq => &self.groq,
        }
    }

    /// Mutable settings for one provider
    pub fn get_mut(&mut self, provider: ProviderId) -> &mut ProviderConfig {
        match provider {
            ProviderId::Cerebras => &mut self.cerebras,
            ProviderId::Gemini => &mut self.gemini,
            ProviderId::Groq => &mut self.groq,
        }
    }
}

/// Settings for one provider
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProviderConfig {
    /// Whether the provider takes part in routing
    pub enabled: bool,

    /// API base URL; the adapter default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub base_url: Option<String>,

    /// Model name; the adapter default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub model: Option<String>,

    /// Base environment variable for keys; slots are read from `NAME`,
    /// `NAME_2` and `NAME_3`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,

    /// Literal keys, used instead of the environment when non-empty
    #[serde(skip_serializing)]
    pub keys: Vec<SecretString>,

    /// Requests allowed per key per quota window; provider default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub quota_limit: Option<u32>,

    /// Quota window length
    #[serde(with = "humantime_serde")]
    pub quota_window: Duration,

    /// HTTP client timeout for one call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            model: None,
            key_env: None,
            keys: Vec::new(),
            quota_limit: None,
            quota_window: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RouterConfig {
    /// Effective pricing for `provider`, honouring overrides
    #[must_use]
    pub fn pricing_for(&self, provider: ProviderId) -> TokenPricing {
        self.pricing
            .get(&provider)
            .copied()
            .unwrap_or_else(|| TokenPricing::default_for(provider))
    }
}

impl ProviderConfig {
    /// Effective quota limit for `provider`
    #[must_use]
    pub fn effective_quota_limit(&self, provider: ProviderId) -> u32 {
        self.quota_limit.unwrap_or(match provider {
            ProviderId::Cerebras | ProviderId::Groq => 30,
            ProviderId::Gemini => 15,
        })
    }

    /// Effective base environment variable for `provider`
    #[must_use]
    pub fn effective_key_env(&self, provider: ProviderId) -> String {
        self.key_env
            .clone()
            .unwrap_or_else(|| provider.default_key_env().to_string())
    }
}

/// Routing table
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider order for high-tier requests
    #[validate(custom(function = "validate_preference"))]
    pub high: Vec<ProviderId>,
    /// Provider order for medium-tier requests
    #[validate(custom(function = "validate_preference"))]
    pub medium: Vec<ProviderId>,
    /// Provider order for low-tier requests
    #[validate(custom(function = "validate_preference"))]
    pub low: Vec<ProviderId>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        use ProviderId::{Cerebras, Gemini, Groq};
        Self {
            high: vec![Cerebras, Gemini, Groq],
            medium: vec![Gemini, Groq, Cerebras],
            low: vec![Groq, Gemini, Cerebras],
        }
    }
}

impl RoutingConfig {
    /// Preference order for a tier
    #[must_use]
    pub fn preferences(&self, tier: ComplexityTier) -> &[ProviderId] {
        match tier {
            ComplexityTier::High => &self.high,
            ComplexityTier::Medium => &self.medium,
            ComplexityTier::Low => &self.low,
        }
    }
}

fn validate_preference(order: &[ProviderId]) -> Result<(), ValidationError> {
    if order.is_empty() {
        return Err(ValidationError::new("empty_preference"));
    }
    let mut seen = Vec::with_capacity(order.len());
    for provider in order {
        if seen.contains(provider) {
            return Err(ValidationError::new("duplicate_provider"));
        }
        seen.push(*provider);
    }
    Ok(())
}

/// Classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Prompts longer than this are at least medium
    #[validate(range(min = 1))]
    pub medium_chars: usize,
    /// Prompts longer than this are high
    #[validate(range(min = 1))]
    pub high_chars: usize,
    /// `max_tokens` at or above this promotes to at least medium
    #[validate(range(min = 1))]
    pub large_output_tokens: u32,
    /// Whether planning tasks are promoted to at least medium
    pub promote_planning: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            medium_chars: 500,
            high_chars: 3000,
            large_output_tokens: 4000,
            promote_planning: true,
        }
    }
}

/// Deadline settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Overall request deadline
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,

    /// Floor for a single attempt's timeout
    #[serde(with = "humantime_serde")]
    pub min_attempt_timeout: Duration,

    /// Lead time before racing the next candidate; disabled when absent
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub hedge_after: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            min_attempt_timeout: Duration::from_secs(2),
            hedge_after: None,
        }
    }
}

/// Health tracking settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval of the periodic health tick
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Timeout of one capability probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Consecutive failures on a key before it is rotated out
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// How long a rotated-out key sits before it is eligible again
    #[serde(with = "humantime_serde")]
    pub key_cooldown: Duration,

    /// Error rate over the window that marks a provider unhealthy
    #[validate(range(min = 0.0, max = 1.0))]
    pub error_rate_threshold: f64,

    /// Number of recent attempts the error rate is computed over
    #[validate(range(min = 1))]
    pub error_window: usize,

    /// Attempts needed in the window before the rate applies
    #[validate(range(min = 1))]
    pub min_requests: usize,

    /// How long an unhealthy provider stays out before half-opening
    #[serde(with = "humantime_serde")]
    pub breaker_cooldown: Duration,

    /// Probe all providers once before the first request
    pub probe_on_cold_start: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
            key_cooldown: Duration::from_secs(60),
            error_rate_threshold: 0.5,
            error_window: 20,
            min_requests: 5,
            breaker_cooldown: Duration::from_secs(30),
            probe_on_cold_start: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Telemetry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to logs and spans
    #[validate(length(min = 1))]
    pub service_name: String,
    /// Log output format
    pub log_format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// OTLP collector endpoint; tracing export disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
    /// Fraction of traces sampled when exporting spans
    #[validate(range(min = 0.0, max = 1.0))]
    pub trace_sampling_rate: f64,
    /// Export Prometheus metrics
    pub metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "itinerary-router".to_string(),
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            otlp_endpoint: None,
            trace_sampling_rate: 1.0,
            metrics: true,
        }
    }
}
