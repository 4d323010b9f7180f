//! Registry construction from configuration.

use crate::keys::KeyPolicy;
use crate::registry::{ProviderRegistry, ProviderSettings, RegistryBuilder};
use crate::transport::AdapterConfig;
use crate::{cerebras, gemini, groq};
use gateway_config::{ProviderConfig, RouterConfig};
use gateway_core::{ComplexityTier, GatewayError, LLMProvider, ProviderId};
use gateway_resilience::CircuitBreakerConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Registration settings for one provider from its config section
#[must_use]
pub fn settings_from_config(config: &RouterConfig, provider: ProviderId) -> ProviderSettings {
    let section = config.providers.get(provider);
    ProviderSettings::new(section.keys.clone())
        .with_enabled(section.enabled)
        .with_key_policy(KeyPolicy {
            quota_limit: section.effective_quota_limit(provider),
            quota_window: section.quota_window,
            failure_threshold: config.health.failure_threshold,
            key_cooldown: config.health.key_cooldown,
        })
        .with_pricing(config.pricing_for(provider))
}

/// Build the HTTP adapter for one provider
///
/// # Errors
/// Returns error if the HTTP client cannot be created
pub fn http_adapter(
    provider: ProviderId,
    section: &ProviderConfig,
) -> Result<Arc<dyn LLMProvider>, GatewayError> {
    let defaults = match provider {
        ProviderId::Cerebras => cerebras::default_config(),
        ProviderId::Gemini => gemini::default_config(),
        ProviderId::Groq => groq::default_config(),
    };
    let adapter_config = AdapterConfig::new(
        section.base_url.clone().unwrap_or(defaults.base_url),
        section.model.clone().unwrap_or(defaults.model),
    )
    .with_timeout(section.request_timeout);

    let adapter: Arc<dyn LLMProvider> = match provider {
        ProviderId::Cerebras => Arc::new(cerebras::provider(adapter_config)?),
        ProviderId::Gemini => Arc::new(gemini::GeminiProvider::new(adapter_config)?),
        ProviderId::Groq => Arc::new(groq::provider(adapter_config)?),
    };
    Ok(adapter)
}

/// Registry builder preloaded with the routing table, breaker and probe
/// settings from configuration, but no adapters
#[must_use]
pub fn builder_from_config(config: &RouterConfig) -> RegistryBuilder {
    let breaker = CircuitBreakerConfig {
        error_rate_threshold: config.health.error_rate_threshold,
        window_size: config.health.error_window,
        min_requests: config.health.min_requests,
        cooldown: config.health.breaker_cooldown,
        ..CircuitBreakerConfig::default()
    };

    ComplexityTier::ALL.into_iter().fold(
        ProviderRegistry::builder()
            .with_breaker(breaker)
            .with_probe_timeout(config.health.probe_timeout),
        |builder, tier| builder.with_preferences(tier, config.routing.preferences(tier).to_vec()),
    )
}

/// Build the registry with HTTP adapters for every provider
///
/// # Errors
/// Returns error if an adapter cannot be created
pub fn build_registry(config: &RouterConfig) -> Result<ProviderRegistry, GatewayError> {
    let mut builder = builder_from_config(config);

    for provider in ProviderId::ALL {
        let section = config.providers.get(provider);
        let settings = settings_from_config(config, provider);
        if settings.enabled && settings.keys.is_empty() {
            warn!(
                provider = %provider,
                key_env = %section.effective_key_env(provider),
                "No API keys configured, provider will be unavailable"
            );
        }
        builder = builder.register(http_adapter(provider, section)?, settings);
    }

    let registry = builder.build();
    info!(providers = ?registry.providers().collect::<Vec<_>>(), "Provider registry built");
    Ok(registry)
}
