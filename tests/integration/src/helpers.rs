//! Test harness: scripted providers wired into a real registry and pipeline

use gateway_core::{ComplexityTier, LLMProvider, ProviderId};
use gateway_providers::mock::ScriptedProvider;
use gateway_providers::{KeyPolicy, ProviderRegistry, ProviderSettings, RegistryBuilder};
use gateway_routing::RoutingPipeline;
use gateway_telemetry::{MemorySink, ObservabilityRecorder};
use once_cell::sync::Lazy;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Literal keys named after the provider: `groq-primary`, `groq-secondary`, ...
pub fn keys_for(provider: ProviderId, count: usize) -> Vec<SecretString> {
    ["primary", "secondary", "tertiary"]
        .iter()
        .take(count)
        .map(|role| SecretString::new(format!("{provider}-{role}")))
        .collect()
}

/// Builder for a [`Harness`]
#[derive(Default)]
pub struct HarnessBuilder {
    providers: Vec<(Arc<ScriptedProvider>, ProviderSettings)>,
    preferences: Vec<(ComplexityTier, Vec<ProviderId>)>,
    deadline: Option<Duration>,
    hedge_after: Option<Duration>,
}

impl HarnessBuilder {
    /// Register a scripted provider with one key
    #[must_use]
    pub fn provider(self, provider: ScriptedProvider) -> Self {
        let settings = ProviderSettings::new(keys_for(provider.id(), 1));
        self.provider_with(provider, settings)
    }

    /// Register a scripted provider with explicit settings
    #[must_use]
    pub fn provider_with(mut self, provider: ScriptedProvider, settings: ProviderSettings) -> Self {
        self.providers.push((Arc::new(provider), settings));
        self
    }

    /// Register a scripted provider that is switched off
    #[must_use]
    pub fn disabled(self, provider: ScriptedProvider) -> Self {
        let settings = ProviderSettings::new(keys_for(provider.id(), 1)).with_enabled(false);
        self.provider_with(provider, settings)
    }

    /// Override a tier's preference order
    #[must_use]
    pub fn preferences(mut self, tier: ComplexityTier, order: Vec<ProviderId>) -> Self {
        self.preferences.push((tier, order));
        self
    }

    /// Overall request deadline
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Enable hedging with the given lead time
    #[must_use]
    pub fn hedge_after(mut self, lead: Duration) -> Self {
        self.hedge_after = Some(lead);
        self
    }

    /// Assemble the harness
    pub fn build(self) -> Harness {
        init_tracing();

        let mut builder: RegistryBuilder = self
            .preferences
            .into_iter()
            .fold(ProviderRegistry::builder(), |builder, (tier, order)| {
                builder.with_preferences(tier, order)
            });
        let mut scripted = HashMap::new();
        for (provider, settings) in self.providers {
            scripted.insert(provider.id(), Arc::clone(&provider));
            builder = builder.register(provider as Arc<dyn LLMProvider>, settings);
        }
        let registry = Arc::new(builder.build());

        let sink = Arc::new(MemorySink::new());
        let recorder = Arc::new(ObservabilityRecorder::default().with_sink(sink.clone()));

        let mut execution = gateway_config::ExecutionConfig::default();
        if let Some(deadline) = self.deadline {
            execution.deadline = deadline;
        }
        execution.hedge_after = self.hedge_after;
        let config = gateway_config::RouterConfig {
            execution,
            ..gateway_config::RouterConfig::default()
        };
        let pipeline = RoutingPipeline::from_config(&config, Arc::clone(&registry), recorder);

        Harness {
            registry,
            pipeline,
            sink,
            scripted,
        }
    }
}

/// Registry, pipeline and record sink over scripted providers
pub struct Harness {
    /// Shared health store
    pub registry: Arc<ProviderRegistry>,
    /// Pipeline under test
    pub pipeline: RoutingPipeline,
    /// Every emitted routing record
    pub sink: Arc<MemorySink>,
    scripted: HashMap<ProviderId, Arc<ScriptedProvider>>,
}

impl Harness {
    /// Start building a harness
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// The scripted adapter registered for `provider`
    ///
    /// # Panics
    /// Panics if the provider was not registered
    pub fn scripted(&self, provider: ProviderId) -> &ScriptedProvider {
        self.scripted
            .get(&provider)
            .map(AsRef::as_ref)
            .unwrap_or_else(|| panic!("{provider} not registered"))
    }

    /// Total `generate` calls across every adapter
    pub fn total_calls(&self) -> usize {
        self.scripted.values().map(|p| p.call_count()).sum()
    }
}

/// Policy with a small quota and a short window
pub fn tight_policy(quota_limit: u32, quota_window: Duration) -> KeyPolicy {
    KeyPolicy {
        quota_limit,
        quota_window,
        ..KeyPolicy::default()
    }
}
