//! End-to-end request handling: classify, route, execute, record.
//!
//! Exactly one [`RoutingRecord`] is emitted per call to
//! [`RoutingPipeline::handle`], whether the request was served, ran out of
//! candidates, hit its deadline, or never had a candidate at all.

use crate::classifier::ComplexityClassifier;
use crate::fallback::FallbackExecutor;
use crate::router::RoutingEngine;
use gateway_config::{ExecutionConfig, RouterConfig};
use gateway_core::{
    CompletionRequest, CompletionResponse, GatewayError, GatewayResult, RoutingDecision,
    RoutingRequest,
};
use gateway_providers::ProviderRegistry;
use gateway_telemetry::{ObservabilityRecorder, RoutingRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

/// Everything the caller needs to build its response envelope
#[derive(Debug)]
pub struct RoutedResult {
    /// Full routing trace
    pub decision: RoutingDecision,
    /// The served response or the terminal error
    pub result: GatewayResult<CompletionResponse>,
    /// The record handed to the sinks
    pub record: RoutingRecord,
}

impl RoutedResult {
    /// Whether a provider served the request
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Drop the trace and keep the outcome
    ///
    /// # Errors
    /// Returns the terminal routing error
    pub fn into_result(self) -> GatewayResult<CompletionResponse> {
        self.result
    }
}

/// Routing pipeline shared across requests
#[derive(Debug, Clone)]
pub struct RoutingPipeline {
    engine: RoutingEngine,
    executor: FallbackExecutor,
    recorder: Arc<ObservabilityRecorder>,
    deadline: Duration,
    probe_on_cold_start: bool,
}

impl RoutingPipeline {
    /// Pipeline with default classifier and execution settings
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, recorder: Arc<ObservabilityRecorder>) -> Self {
        let execution = ExecutionConfig::default();
        Self {
            engine: RoutingEngine::new(ComplexityClassifier::default(), Arc::clone(&registry)),
            deadline: execution.deadline,
            executor: FallbackExecutor::new(registry, execution),
            recorder,
            probe_on_cold_start: false,
        }
    }

    /// Pipeline configured from the router configuration
    #[must_use]
    pub fn from_config(
        config: &RouterConfig,
        registry: Arc<ProviderRegistry>,
        recorder: Arc<ObservabilityRecorder>,
    ) -> Self {
        Self {
            engine: RoutingEngine::new(
                ComplexityClassifier::new(config.classifier.clone()),
                Arc::clone(&registry),
            ),
            deadline: config.execution.deadline,
            executor: FallbackExecutor::new(registry, config.execution.clone()),
            recorder,
            probe_on_cold_start: config.health.probe_on_cold_start,
        }
    }

    /// Override the overall request deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Probe every provider once before the first request
    #[must_use]
    pub fn with_probe_on_cold_start(mut self, enabled: bool) -> Self {
        self.probe_on_cold_start = enabled;
        self
    }

    /// The routing engine
    #[must_use]
    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    /// The shared registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        self.engine.registry()
    }

    /// The recorder
    #[must_use]
    pub fn recorder(&self) -> &Arc<ObservabilityRecorder> {
        &self.recorder
    }

    /// Route one request to completion. Never fails; the outcome is in
    /// [`RoutedResult::result`].
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn handle(&self, request: &RoutingRequest) -> RoutedResult {
        let started = Instant::now();
        if self.probe_on_cold_start {
            self.registry().ensure_health_checked().await;
        }

        let mut decision = self.engine.plan(request);
        let result = if decision.candidates.is_empty() {
            decision.total_latency = started.elapsed();
            Err(GatewayError::NoAvailableProvider {
                tier: decision.tier,
            })
        } else {
            let completion = CompletionRequest::from_routing(request);
            self.executor
                .execute(&mut decision, &completion, self.deadline)
                .await
        };

        let record = self.recorder.record(&decision, result.as_ref().err());
        info!(
            tier = %decision.tier,
            state = %decision.state,
            provider = ?decision.provider_used,
            attempts = decision.attempts.len(),
            cost_usd = record.cost_usd,
            "Routing finished"
        );

        RoutedResult {
            decision,
            result,
            record,
        }
    }
}
