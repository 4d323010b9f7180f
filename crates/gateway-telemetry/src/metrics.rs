//! Prometheus metrics fed from routing records.

use crate::error::TelemetryError;
use crate::recorder::{RecordSink, RoutingRecord};
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Record sink maintaining Prometheus series
#[derive(Clone)]
pub struct MetricsSink {
    registry: Registry,
    requests_total: IntCounterVec,
    attempts_total: IntCounterVec,
    tokens_total: IntCounterVec,
    cost_total: CounterVec,
    request_duration: HistogramVec,
    fallbacks_total: Counter,
}

impl MetricsSink {
    /// Create the sink on its own registry
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, TelemetryError> {
        Self::with_registry(Registry::new())
    }

    /// Create the sink on an existing registry
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn with_registry(registry: Registry) -> Result<Self, TelemetryError> {
        let requests_total = IntCounterVec::new(
            Opts::new("router_requests_total", "Routed requests by tier and outcome"),
            &["tier", "outcome"],
        )?;
        let attempts_total = IntCounterVec::new(
            Opts::new("router_attempts_total", "Provider attempts by provider and status"),
            &["provider", "status"],
        )?;
        let tokens_total = IntCounterVec::new(
            Opts::new("router_tokens_total", "Tokens consumed by served responses"),
            &["provider", "type"],
        )?;
        let cost_total = CounterVec::new(
            Opts::new("router_cost_usd_total", "Estimated spend in dollars"),
            &["provider"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("router_request_duration_seconds", "End-to-end routing latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["tier"],
        )?;
        let fallbacks_total = Counter::with_opts(Opts::new(
            "router_fallbacks_total",
            "Failed attempts that triggered a fallback",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(cost_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(fallbacks_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            attempts_total,
            tokens_total,
            cost_total,
            request_duration,
            fallbacks_total,
        })
    }

    /// Underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every series
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn gather(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl RecordSink for MetricsSink {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn emit(&self, record: &RoutingRecord) -> Result<(), TelemetryError> {
        let tier = record.tier.as_str();
        self.requests_total
            .with_label_values(&[tier, record.outcome_label()])
            .inc();
        self.request_duration
            .with_label_values(&[tier])
            .observe(record.total_latency_ms as f64 / 1000.0);

        for outcome in &record.outcomes {
            let Some(provider) = outcome.provider else {
                continue;
            };
            self.attempts_total
                .with_label_values(&[provider.as_str(), outcome.status.as_str()])
                .inc();
            if outcome.error_kind.is_some() {
                self.fallbacks_total.inc();
            }
        }

        if let Some(provider) = record.provider_used {
            let name = provider.as_str();
            self.tokens_total
                .with_label_values(&[name, "prompt"])
                .inc_by(u64::from(record.usage.prompt_tokens));
            self.tokens_total
                .with_label_values(&[name, "completion"])
                .inc_by(u64::from(record.usage.completion_tokens));
            self.cost_total.with_label_values(&[name]).inc_by(record.cost_usd);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink").finish_non_exhaustive()
    }
}
