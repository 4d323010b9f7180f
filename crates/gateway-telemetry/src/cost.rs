//! Cost estimation for routed requests.
//!
//! Prices come from a static per-provider table which configuration may
//! override. Only the served response's tokens are charged.

use gateway_core::{ProviderId, RoutingDecision, TokenPricing, Usage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-provider token prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    rates: BTreeMap<ProviderId, TokenPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingTable {
    /// Table with each provider's list price
    #[must_use]
    pub fn new() -> Self {
        Self {
            rates: ProviderId::ALL
                .into_iter()
                .map(|p| (p, TokenPricing::default_for(p)))
                .collect(),
        }
    }

    /// Table with configured overrides applied on top of list prices
    #[must_use]
    pub fn with_overrides(overrides: &BTreeMap<ProviderId, TokenPricing>) -> Self {
        overrides
            .iter()
            .fold(Self::new(), |table, (provider, pricing)| {
                table.with_rate(*provider, *pricing)
            })
    }

    /// Override one provider's price
    #[must_use]
    pub fn with_rate(mut self, provider: ProviderId, pricing: TokenPricing) -> Self {
        self.rates.insert(provider, pricing);
        self
    }

    /// Price for a provider
    #[must_use]
    pub fn rate(&self, provider: ProviderId) -> TokenPricing {
        self.rates
            .get(&provider)
            .copied()
            .unwrap_or_else(|| TokenPricing::default_for(provider))
    }

    /// Estimated cost of `usage` on `provider`
    #[must_use]
    pub fn estimate(&self, provider: ProviderId, usage: &Usage) -> f64 {
        self.rate(provider).cost(usage)
    }

    /// Estimated cost of a routed request; zero when nothing was served
    #[must_use]
    pub fn estimate_decision(&self, decision: &RoutingDecision) -> f64 {
        decision
            .provider_used
            .map_or(0.0, |provider| self.estimate(provider, &decision.usage))
    }
}
