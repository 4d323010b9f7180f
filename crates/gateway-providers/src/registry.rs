//! Provider registry and health store.
//!
//! The registry is the single owner of provider health and key slot state.
//! It is constructed once and shared by handle (`Arc`) with the routing
//! pipeline. Each provider's mutable state sits behind its own mutex, so
//! outcomes for different providers never contend.
//!
//! A provider is available when it is enabled, its error-rate breaker admits
//! traffic, and its active key slot has capacity.

use crate::keys::{KeyLease, KeyPolicy, KeyRing, KeySlotSnapshot};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use gateway_core::{
    ComplexityTier, ErrorKind, KeyRole, LLMProvider, ProviderId, ProviderOutcome, TokenPricing,
    Usage,
};
use gateway_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const LATENCY_ALPHA: f64 = 0.2;

/// Why a provider is not available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhealthyReason {
    /// Switched off in configuration
    Disabled,
    /// Every key slot is out of quota or suspended
    KeysExhausted,
    /// The last capability probe failed
    ProbeFailed,
    /// Recent error rate crossed the threshold
    ErrorRate,
}

/// Aggregate request metrics for one provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Attempts recorded
    pub total_requests: u64,
    /// Successful attempts
    pub successful_requests: u64,
    /// Failed attempts
    pub failed_requests: u64,
    /// Tokens consumed by successful attempts
    pub tokens_used: u64,
    /// Estimated spend in dollars
    pub total_cost: f64,
}

/// Serializable health view of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Provider identity
    pub provider: ProviderId,
    /// Configuration flag
    pub is_enabled: bool,
    /// Error-rate breaker admits traffic
    pub is_healthy: bool,
    /// Active key has quota left
    pub has_capacity: bool,
    /// `is_enabled && is_healthy && has_capacity`
    pub is_available: bool,
    /// Why the provider is out, when it is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_reason: Option<UnhealthyReason>,
    /// Breaker state
    pub circuit: CircuitState,
    /// Active slot role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_key: Option<KeyRole>,
    /// Every slot
    pub key_slots: Vec<KeySlotSnapshot>,
    /// Rolling average latency across slots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    /// Last completed health check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Aggregate metrics
    pub metrics: ProviderMetrics,
}

/// Registration settings for one provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Takes part in routing
    pub enabled: bool,
    /// Key material in slot order
    pub keys: Vec<SecretString>,
    /// Quota and rotation policy
    pub key_policy: KeyPolicy,
    /// Price used for the cost metric; provider list price when absent
    pub pricing: Option<TokenPricing>,
}

impl ProviderSettings {
    /// Enabled provider with the given keys and default policy
    #[must_use]
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self {
            enabled: true,
            keys,
            key_policy: KeyPolicy::default(),
            pricing: None,
        }
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the key policy
    #[must_use]
    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    /// Set the pricing used for cost metrics
    #[must_use]
    pub fn with_pricing(mut self, pricing: TokenPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

struct ProviderState {
    keys: KeyRing,
    metrics: ProviderMetrics,
    avg_latency_ms: Option<f64>,
    last_health_check: Option<DateTime<Utc>>,
    last_probe_failed: bool,
}

/// Registered provider: adapter plus health state
pub struct ProviderEntry {
    adapter: Arc<dyn LLMProvider>,
    enabled: bool,
    pricing: TokenPricing,
    breaker: CircuitBreaker,
    state: Mutex<ProviderState>,
}

impl ProviderEntry {
    /// The adapter
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn LLMProvider> {
        &self.adapter
    }

    fn is_available(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || !self.breaker.is_healthy() {
            return false;
        }
        let mut state = self.state.lock();
        // A failed probe holds until a later probe succeeds, whatever the breaker cooldown
        if state.last_probe_failed {
            return false;
        }
        state.keys.refresh(now);
        state.keys.has_capacity(now)
    }

    fn avg_latency_ms(&self) -> Option<f64> {
        self.state.lock().avg_latency_ms
    }
}

/// Builder for [`ProviderRegistry`]
pub struct RegistryBuilder {
    entries: Vec<(Arc<dyn LLMProvider>, ProviderSettings)>,
    preferences: BTreeMap<ComplexityTier, Vec<ProviderId>>,
    breaker: CircuitBreakerConfig,
    probe_timeout: Duration,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Builder with the default tier preference table
    #[must_use]
    pub fn new() -> Self {
        use ProviderId::{Cerebras, Gemini, Groq};
        let preferences = BTreeMap::from([
            (ComplexityTier::High, vec![Cerebras, Gemini, Groq]),
            (ComplexityTier::Medium, vec![Gemini, Groq, Cerebras]),
            (ComplexityTier::Low, vec![Groq, Gemini, Cerebras]),
        ]);
        Self {
            entries: Vec::new(),
            preferences,
            breaker: CircuitBreakerConfig::default(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Set the preference order for one tier
    #[must_use]
    pub fn with_preferences(mut self, tier: ComplexityTier, order: Vec<ProviderId>) -> Self {
        self.preferences.insert(tier, order);
        self
    }

    /// Set the breaker configuration applied to every provider
    #[must_use]
    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Register an adapter. A later registration for the same provider wins.
    #[must_use]
    pub fn register(mut self, adapter: Arc<dyn LLMProvider>, settings: ProviderSettings) -> Self {
        self.entries.retain(|(existing, _)| existing.id() != adapter.id());
        self.entries.push((adapter, settings));
        self
    }

    /// Build the registry. All providers start healthy.
    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        let now = Utc::now();
        let entries = self
            .entries
            .into_iter()
            .map(|(adapter, settings)| {
                let id = adapter.id();
                let entry = ProviderEntry {
                    enabled: settings.enabled,
                    pricing: settings
                        .pricing
                        .unwrap_or_else(|| TokenPricing::default_for(id)),
                    breaker: CircuitBreaker::new(id, self.breaker.clone()),
                    state: Mutex::new(ProviderState {
                        keys: KeyRing::new(id, settings.keys, settings.key_policy, now),
                        metrics: ProviderMetrics::default(),
                        avg_latency_ms: None,
                        last_health_check: None,
                        last_probe_failed: false,
                    }),
                    adapter,
                };
                (id, entry)
            })
            .collect();

        ProviderRegistry {
            entries,
            preferences: self.preferences,
            probe_timeout: self.probe_timeout,
            cold_start: OnceCell::new(),
        }
    }
}

/// In-process provider registry
pub struct ProviderRegistry {
    entries: BTreeMap<ProviderId, ProviderEntry>,
    preferences: BTreeMap<ComplexityTier, Vec<ProviderId>>,
    probe_timeout: Duration,
    cold_start: OnceCell<()>,
}

impl ProviderRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registered providers in id order
    pub fn providers(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.entries.keys().copied()
    }

    /// Adapter for a provider
    #[must_use]
    pub fn adapter(&self, provider: ProviderId) -> Option<Arc<dyn LLMProvider>> {
        self.entries.get(&provider).map(|e| Arc::clone(&e.adapter))
    }

    /// Whether a provider can take a request right now
    #[must_use]
    pub fn is_available(&self, provider: ProviderId) -> bool {
        self.entries
            .get(&provider)
            .is_some_and(|entry| entry.is_available(Utc::now()))
    }

    /// Price used for a provider's cost metric
    #[must_use]
    pub fn pricing(&self, provider: ProviderId) -> TokenPricing {
        self.entries
            .get(&provider)
            .map_or_else(|| TokenPricing::default_for(provider), |e| e.pricing)
    }

    /// Available providers for a tier, best first.
    ///
    /// Ordered by the tier's preference table; providers missing from the
    /// table follow. Ties in rank break on ascending average latency, then id.
    #[must_use]
    pub fn get_candidates(&self, tier: ComplexityTier) -> Vec<ProviderId> {
        self.candidates_at(tier, Utc::now())
    }

    pub(crate) fn candidates_at(&self, tier: ComplexityTier, now: DateTime<Utc>) -> Vec<ProviderId> {
        let order = self.preferences.get(&tier).map_or(&[][..], Vec::as_slice);
        let rank = |id: ProviderId| order.iter().position(|p| *p == id).unwrap_or(order.len());

        let mut available: Vec<(usize, f64, ProviderId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_available(now))
            .map(|(id, entry)| (rank(*id), entry.avg_latency_ms().unwrap_or(f64::MAX), *id))
            .collect();

        available.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.total_cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let candidates: Vec<ProviderId> = available.into_iter().map(|(_, _, id)| id).collect();
        debug!(tier = %tier, candidates = ?candidates, "Built candidate list");
        candidates
    }

    /// Lease the active key of a provider, rotating first if needed
    #[must_use]
    pub fn acquire(&self, provider: ProviderId) -> Option<KeyLease> {
        let entry = self.entries.get(&provider)?;
        entry.state.lock().keys.lease(Utc::now())
    }

    /// Feed one attempt outcome back. This is the only path by which request
    /// traffic mutates health state.
    pub fn record_outcome(
        &self,
        provider: ProviderId,
        key_role: Option<KeyRole>,
        outcome: &ProviderOutcome,
    ) {
        self.record_outcome_at(provider, key_role, outcome, Utc::now());
    }

    pub(crate) fn record_outcome_at(
        &self,
        provider: ProviderId,
        key_role: Option<KeyRole>,
        outcome: &ProviderOutcome,
        now: DateTime<Utc>,
    ) {
        let Some(entry) = self.entries.get(&provider) else {
            warn!(provider = %provider, "Outcome recorded for unregistered provider");
            return;
        };

        match outcome {
            ProviderOutcome::Success { .. } => entry.breaker.record_success(),
            ProviderOutcome::Failure { kind, .. } if kind.counts_against_health() => {
                entry.breaker.record_failure();
            }
            ProviderOutcome::Failure { .. } => {}
        }

        let mut state = entry.state.lock();
        state.metrics.total_requests += 1;
        match outcome {
            ProviderOutcome::Success { usage, .. } => {
                state.metrics.successful_requests += 1;
                state.metrics.tokens_used += u64::from(usage.total_tokens);
                state.metrics.total_cost += entry.pricing.cost(usage);
            }
            ProviderOutcome::Failure { .. } => state.metrics.failed_requests += 1,
        }

        // A lease that never reached the adapter says nothing about latency
        if key_role.is_some() {
            let sample = outcome.latency().as_secs_f64() * 1000.0;
            state.avg_latency_ms = Some(match state.avg_latency_ms {
                Some(avg) => LATENCY_ALPHA.mul_add(sample - avg, avg),
                None => sample,
            });
        }

        if let Some(role) = key_role {
            state.keys.record(role, outcome, now);
        }

        debug!(
            provider = %provider,
            key_role = ?key_role,
            success = outcome.is_success(),
            active_key = ?state.keys.active_role(),
            "Recorded provider outcome"
        );
    }

    /// Probe every enabled provider concurrently and refresh key windows.
    /// Never fails; probe failures leave the provider marked unavailable.
    #[instrument(skip(self))]
    pub async fn run_health_check(&self) -> Vec<ProviderHealth> {
        let probes = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(id, entry)| self.probe_one(*id, entry));
        join_all(probes).await;

        info!(
            available = ?self
                .snapshot()
                .iter()
                .filter(|h| h.is_available)
                .map(|h| h.provider)
                .collect::<Vec<_>>(),
            "Health check complete"
        );
        self.snapshot()
    }

    async fn probe_one(&self, provider: ProviderId, entry: &ProviderEntry) {
        let lease = {
            let mut state = entry.state.lock();
            let lease = state.keys.lease(Utc::now());
            if lease.is_none() {
                state.last_health_check = Some(Utc::now());
            }
            lease
        };
        let Some(lease) = lease else {
            debug!(provider = %provider, "Skipping probe, no eligible key slot");
            return;
        };

        let result =
            match tokio::time::timeout(self.probe_timeout, entry.adapter.probe(&lease.key)).await {
                Ok(result) => result.map_err(|e| e.kind),
                Err(_) => Err(ErrorKind::Transient),
            };

        let now = Utc::now();
        let mut state = entry.state.lock();
        state.last_health_check = Some(now);

        match result {
            Ok(()) => {
                state.last_probe_failed = false;
                if entry.breaker.state() != CircuitState::Closed {
                    info!(provider = %provider, "Probe succeeded, provider healthy again");
                }
                entry.breaker.reset();
            }
            Err(kind @ (ErrorKind::Quota | ErrorKind::Auth)) => {
                // Key problem, not a provider problem
                warn!(provider = %provider, key_role = %lease.role, kind = %kind, "Probe rejected key");
                let outcome = ProviderOutcome::Failure {
                    kind,
                    latency: Duration::ZERO,
                    retry_after: None,
                };
                state.keys.record(lease.role, &outcome, now);
            }
            Err(kind) => {
                warn!(provider = %provider, kind = %kind, "Probe failed, marking provider unhealthy");
                state.last_probe_failed = true;
                entry.breaker.force_open();
            }
        }
    }

    /// Run one health check per process before first use
    pub async fn ensure_health_checked(&self) {
        self.cold_start
            .get_or_init(|| async {
                self.run_health_check().await;
            })
            .await;
    }

    /// Periodic health tick for long-lived processes
    pub fn spawn_health_checks(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                registry.run_health_check().await;
            }
        })
    }

    /// Health view of one provider
    #[must_use]
    pub fn health(&self, provider: ProviderId) -> Option<ProviderHealth> {
        let entry = self.entries.get(&provider)?;
        Some(Self::health_of(provider, entry, Utc::now()))
    }

    /// Health view of every provider
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let now = Utc::now();
        self.entries
            .iter()
            .map(|(id, entry)| Self::health_of(*id, entry, now))
            .collect()
    }

    fn health_of(provider: ProviderId, entry: &ProviderEntry, now: DateTime<Utc>) -> ProviderHealth {
        let breaker_healthy = entry.breaker.is_healthy();
        let mut state = entry.state.lock();
        let is_healthy = breaker_healthy && !state.last_probe_failed;
        state.keys.refresh(now);
        let has_capacity = state.keys.has_capacity(now);
        let is_available = entry.enabled && is_healthy && has_capacity;

        let unhealthy_reason = if is_available {
            None
        } else if !entry.enabled {
            Some(UnhealthyReason::Disabled)
        } else if !has_capacity {
            Some(UnhealthyReason::KeysExhausted)
        } else if state.last_probe_failed {
            Some(UnhealthyReason::ProbeFailed)
        } else {
            Some(UnhealthyReason::ErrorRate)
        };

        ProviderHealth {
            provider,
            is_enabled: entry.enabled,
            is_healthy,
            has_capacity,
            is_available,
            unhealthy_reason,
            circuit: entry.breaker.state(),
            active_key: state.keys.active_role(),
            key_slots: state.keys.snapshot(now),
            avg_latency_ms: state.avg_latency_ms,
            last_health_check: state.last_health_check,
            metrics: state.metrics,
        }
    }

    /// Total tokens consumed across providers
    #[must_use]
    pub fn total_usage(&self) -> Usage {
        // Prompt/completion split is not tracked per provider
        let total: u64 = self
            .entries
            .values()
            .map(|e| e.state.lock().metrics.tokens_used)
            .sum();
        Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: u32::try_from(total).unwrap_or(u32::MAX),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.entries.keys().collect::<Vec<_>>())
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedProvider, Step};

    fn keys(n: usize) -> Vec<SecretString> {
        (1..=n).map(|i| SecretString::new(format!("k{i}"))).collect()
    }

    fn registry_with(settings: impl Fn(ProviderId) -> ProviderSettings) -> ProviderRegistry {
        ProviderId::ALL
            .into_iter()
            .fold(ProviderRegistry::builder(), |builder, id| {
                builder.register(Arc::new(ScriptedProvider::new(id)), settings(id))
            })
            .build()
    }

    fn success(ms: u64) -> ProviderOutcome {
        ProviderOutcome::Success {
            latency: Duration::from_millis(ms),
            usage: Usage::new(100, 50),
        }
    }

    fn failure(kind: ErrorKind) -> ProviderOutcome {
        ProviderOutcome::Failure {
            kind,
            latency: Duration::from_millis(10),
            retry_after: None,
        }
    }

    #[test]
    fn test_default_candidate_order() {
        let registry = registry_with(|_| ProviderSettings::new(keys(1)));
        assert_eq!(
            registry.get_candidates(ComplexityTier::Low),
            vec![ProviderId::Groq, ProviderId::Gemini, ProviderId::Cerebras]
        );
        assert_eq!(
            registry.get_candidates(ComplexityTier::High),
            vec![ProviderId::Cerebras, ProviderId::Gemini, ProviderId::Groq]
        );
    }

    #[test]
    fn test_disabled_and_keyless_filtered() {
        let registry = registry_with(|id| match id {
            ProviderId::Groq => ProviderSettings::new(keys(1)).with_enabled(false),
            ProviderId::Gemini => ProviderSettings::new(vec![]),
            ProviderId::Cerebras => ProviderSettings::new(keys(1)),
        });
        assert_eq!(
            registry.get_candidates(ComplexityTier::Low),
            vec![ProviderId::Cerebras]
        );

        let groq = registry.health(ProviderId::Groq).unwrap();
        assert_eq!(groq.unhealthy_reason, Some(UnhealthyReason::Disabled));
        let gemini = registry.health(ProviderId::Gemini).unwrap();
        assert_eq!(gemini.unhealthy_reason, Some(UnhealthyReason::KeysExhausted));
    }

    #[test]
    fn test_latency_breaks_ties_for_unranked_providers() {
        let registry = registry_with(|_| ProviderSettings::new(keys(1)))
            .rebuild_preferences(ComplexityTier::Medium, vec![ProviderId::Gemini]);

        registry.record_outcome(ProviderId::Groq, Some(KeyRole::Primary), &success(900));
        registry.record_outcome(ProviderId::Cerebras, Some(KeyRole::Primary), &success(200));

        assert_eq!(
            registry.get_candidates(ComplexityTier::Medium),
            vec![ProviderId::Gemini, ProviderId::Cerebras, ProviderId::Groq]
        );
    }

    #[test]
    fn test_unrelated_health_does_not_reorder() {
        let registry = registry_with(|_| ProviderSettings::new(keys(1)));
        let before = registry.get_candidates(ComplexityTier::Low);

        registry.record_outcome(ProviderId::Cerebras, Some(KeyRole::Primary), &success(5));
        registry.record_outcome(ProviderId::Gemini, Some(KeyRole::Primary), &success(3000));

        assert_eq!(registry.get_candidates(ComplexityTier::Low), before);
    }

    #[test]
    fn test_error_rate_marks_unhealthy() {
        let registry = ProviderRegistry::builder()
            .with_breaker(CircuitBreakerConfig {
                min_requests: 2,
                window_size: 4,
                ..CircuitBreakerConfig::default()
            })
            .register(
                Arc::new(ScriptedProvider::new(ProviderId::Groq)),
                ProviderSettings::new(keys(3)),
            )
            .build();

        registry.record_outcome(ProviderId::Groq, Some(KeyRole::Primary), &failure(ErrorKind::Transient));
        registry.record_outcome(ProviderId::Groq, Some(KeyRole::Primary), &failure(ErrorKind::Transient));

        assert!(!registry.is_available(ProviderId::Groq));
        let health = registry.health(ProviderId::Groq).unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.unhealthy_reason, Some(UnhealthyReason::ErrorRate));
    }

    #[test]
    fn test_quota_errors_do_not_trip_breaker() {
        let registry = registry_with(|_| ProviderSettings::new(keys(3)));
        for _ in 0..10 {
            let role = registry.acquire(ProviderId::Gemini).map(|l| l.role);
            registry.record_outcome(ProviderId::Gemini, role, &failure(ErrorKind::Quota));
        }
        let health = registry.health(ProviderId::Gemini).unwrap();
        assert!(health.is_healthy);
        assert!(!health.has_capacity);
    }

    #[test]
    fn test_rotation_through_registry() {
        let registry = registry_with(|_| {
            ProviderSettings::new(keys(2)).with_key_policy(KeyPolicy {
                quota_limit: 10,
                ..KeyPolicy::default()
            })
        });

        for _ in 0..9 {
            let lease = registry.acquire(ProviderId::Groq).unwrap();
            assert_eq!(lease.role, KeyRole::Primary);
            registry.record_outcome(ProviderId::Groq, Some(lease.role), &success(100));
        }
        let tenth = registry.acquire(ProviderId::Groq).unwrap();
        registry.record_outcome(ProviderId::Groq, Some(tenth.role), &failure(ErrorKind::Quota));

        let eleventh = registry.acquire(ProviderId::Groq).unwrap();
        assert_eq!(eleventh.role, KeyRole::Secondary);
        assert!(registry.is_available(ProviderId::Groq));
    }

    #[test]
    fn test_self_healing_after_window() {
        let registry = registry_with(|_| {
            ProviderSettings::new(keys(1)).with_key_policy(KeyPolicy {
                quota_limit: 5,
                quota_window: Duration::from_secs(60),
                ..KeyPolicy::default()
            })
        });
        let now = Utc::now();
        registry.record_outcome_at(
            ProviderId::Groq,
            Some(KeyRole::Primary),
            &failure(ErrorKind::Quota),
            now,
        );
        assert!(!registry
            .candidates_at(ComplexityTier::Low, now)
            .contains(&ProviderId::Groq));

        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            registry.candidates_at(ComplexityTier::Low, later)[0],
            ProviderId::Groq
        );
    }

    #[test]
    fn test_metrics_and_cost() {
        let registry = registry_with(|id| {
            ProviderSettings::new(keys(1)).with_pricing(if id == ProviderId::Groq {
                TokenPricing::new(1.0, 2.0)
            } else {
                TokenPricing::default_for(id)
            })
        });
        registry.record_outcome(ProviderId::Groq, Some(KeyRole::Primary), &success(100));
        registry.record_outcome(ProviderId::Groq, Some(KeyRole::Primary), &failure(ErrorKind::Transient));

        let metrics = registry.health(ProviderId::Groq).unwrap().metrics;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.tokens_used, 150);
        // 0.1 * 1.0 + 0.05 * 2.0
        assert!((metrics.total_cost - 0.2).abs() < 1e-9);
        assert_eq!(registry.total_usage().total_tokens, 150);
    }

    #[tokio::test]
    async fn test_probe_failure_and_recovery() {
        let groq = Arc::new(ScriptedProvider::new(ProviderId::Groq).with_probe(Err(ErrorKind::Transient)));
        let registry = ProviderRegistry::builder()
            .register(groq.clone(), ProviderSettings::new(keys(1)))
            .build();

        let health = registry.run_health_check().await;
        assert!(!health[0].is_available);
        assert_eq!(health[0].unhealthy_reason, Some(UnhealthyReason::ProbeFailed));
        assert!(health[0].last_health_check.is_some());

        groq.set_probe(Ok(()));
        let health = registry.run_health_check().await;
        assert!(health[0].is_available);
        assert_eq!(groq.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_outlasts_breaker_cooldown() {
        let groq = Arc::new(ScriptedProvider::new(ProviderId::Groq).with_probe(Err(ErrorKind::Transient)));
        let registry = ProviderRegistry::builder()
            .with_breaker(CircuitBreakerConfig {
                cooldown: Duration::from_millis(50),
                ..CircuitBreakerConfig::default()
            })
            .register(groq.clone(), ProviderSettings::new(keys(1)))
            .build();

        registry.run_health_check().await;
        assert!(!registry.is_available(ProviderId::Groq));

        // Breaker may half-open, the failed probe still holds
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.get_candidates(ComplexityTier::Low).is_empty());
        let health = registry.health(ProviderId::Groq).unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.unhealthy_reason, Some(UnhealthyReason::ProbeFailed));
        assert_eq!(groq.probe_count(), 1);

        groq.set_probe(Ok(()));
        registry.run_health_check().await;
        assert_eq!(registry.get_candidates(ComplexityTier::Low), vec![ProviderId::Groq]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_keep_state_consistent() {
        const TASKS: u64 = 64;
        const PER_TASK: u64 = 25;

        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(
                    Arc::new(ScriptedProvider::new(ProviderId::Groq)),
                    ProviderSettings::new(keys(3)).with_key_policy(KeyPolicy {
                        quota_limit: 200,
                        ..KeyPolicy::default()
                    }),
                )
                .build(),
        );

        let tasks: Vec<_> = (0..TASKS)
            .map(|task| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    for i in 0..PER_TASK {
                        let role = registry.acquire(ProviderId::Groq).map(|lease| lease.role);
                        let outcome = match (task + i) % 7 {
                            0 => failure(ErrorKind::Quota),
                            1 => failure(ErrorKind::Transient),
                            _ => success(20),
                        };
                        registry.record_outcome(ProviderId::Groq, role, &outcome);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        let health = registry.health(ProviderId::Groq).unwrap();
        assert_eq!(health.metrics.total_requests, TASKS * PER_TASK);
        assert_eq!(
            health.metrics.successful_requests + health.metrics.failed_requests,
            TASKS * PER_TASK
        );
        assert!(health.key_slots.iter().filter(|slot| slot.is_active).count() <= 1);
    }

    #[tokio::test]
    async fn test_probe_auth_suspends_key() {
        let gemini =
            Arc::new(ScriptedProvider::new(ProviderId::Gemini).with_probe(Err(ErrorKind::Auth)));
        let registry = ProviderRegistry::builder()
            .register(gemini, ProviderSettings::new(keys(2)))
            .build();

        let health = registry.run_health_check().await;
        assert!(health[0].is_available);
        assert_eq!(health[0].active_key, Some(KeyRole::Secondary));
    }

    #[tokio::test]
    async fn test_cold_start_check_runs_once() {
        let groq = Arc::new(ScriptedProvider::new(ProviderId::Groq));
        let registry = ProviderRegistry::builder()
            .register(groq.clone(), ProviderSettings::new(keys(1)))
            .build();

        registry.ensure_health_checked().await;
        registry.ensure_health_checked().await;
        assert_eq!(groq.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_health_tick() {
        let groq = Arc::new(ScriptedProvider::new(ProviderId::Groq));
        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(groq.clone(), ProviderSettings::new(keys(1)))
                .build(),
        );

        let handle = registry.spawn_health_checks(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(125)).await;
        handle.abort();

        assert_eq!(groq.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_provider_not_probed() {
        let groq = Arc::new(ScriptedProvider::new(ProviderId::Groq).then(Step::fail(ErrorKind::Auth)));
        let registry = ProviderRegistry::builder()
            .register(groq.clone(), ProviderSettings::new(keys(1)).with_enabled(false))
            .build();
        registry.run_health_check().await;
        assert_eq!(groq.probe_count(), 0);
    }

    impl ProviderRegistry {
        fn rebuild_preferences(mut self, tier: ComplexityTier, order: Vec<ProviderId>) -> Self {
            self.preferences.insert(tier, order);
            self
        }
    }
}
