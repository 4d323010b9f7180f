//! Routing engine: classify, then ask the registry for candidates.

use crate::classifier::ComplexityClassifier;
use gateway_core::{GatewayError, GatewayResult, RoutingDecision, RoutingRequest, RoutingState};
use gateway_providers::ProviderRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the routing decision for each request
#[derive(Debug, Clone)]
pub struct RoutingEngine {
    classifier: ComplexityClassifier,
    registry: Arc<ProviderRegistry>,
}

impl RoutingEngine {
    /// Create an engine over a shared registry
    #[must_use]
    pub fn new(classifier: ComplexityClassifier, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    /// The shared registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The classifier
    #[must_use]
    pub fn classifier(&self) -> &ComplexityClassifier {
        &self.classifier
    }

    /// Classify and build the candidate list. Always returns a decision; an
    /// empty candidate list leaves it in `NoProviderAvailable`.
    #[must_use]
    pub fn plan(&self, request: &RoutingRequest) -> RoutingDecision {
        let tier = self.classifier.classify(request);
        let mut decision = RoutingDecision::new(request.request_id.clone(), tier);
        decision.set_candidates(self.registry.get_candidates(tier));

        if decision.state == RoutingState::NoProviderAvailable {
            warn!(request_id = %request.request_id, tier = %tier, "No provider available");
        } else {
            debug!(
                request_id = %request.request_id,
                tier = %tier,
                candidates = ?decision.candidates,
                "Built routing decision"
            );
        }
        decision
    }

    /// Like [`plan`](Self::plan), but an empty candidate list is an error
    ///
    /// # Errors
    /// Returns [`GatewayError::NoAvailableProvider`] when no provider is
    /// available for the request's tier
    pub fn route(&self, request: &RoutingRequest) -> GatewayResult<RoutingDecision> {
        let decision = self.plan(request);
        if decision.candidates.is_empty() {
            return Err(GatewayError::NoAvailableProvider {
                tier: decision.tier,
            });
        }
        Ok(decision)
    }
}
