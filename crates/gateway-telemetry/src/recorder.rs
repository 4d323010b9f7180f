//! Per-request routing records.
//!
//! The [`ObservabilityRecorder`] turns a finished [`RoutingDecision`] into a
//! [`RoutingRecord`] and hands it to every configured [`RecordSink`].
//! Recording never blocks and never fails the caller: sink errors are
//! swallowed and counted.

use crate::cost::PricingTable;
use crate::error::TelemetryError;
use chrono::{DateTime, Utc};
use gateway_core::{
    AttemptStatus, ComplexityTier, ErrorKind, GatewayError, KeyRole, ProviderId, RoutingDecision,
    RoutingState, Usage,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One entry of a record's outcome list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    /// Provider attempted; absent for a terminal entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    /// Key slot used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_role: Option<KeyRole>,
    /// `succeeded`, `failed`, `superseded`, or the terminal state
    pub status: String,
    /// Classified failure kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Attempt latency
    pub latency_ms: u64,
    /// Attempt was a hedge
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hedged: bool,
}

/// Structured event emitted once per routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Request correlation id
    pub request_id: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Complexity tier
    pub tier: ComplexityTier,
    /// Terminal routing state
    pub state: RoutingState,
    /// Provider that served the request
    pub provider_used: Option<ProviderId>,
    /// Ordered candidate list
    pub candidates: Vec<ProviderId>,
    /// Per-attempt outcomes; a single terminal entry when nothing was tried
    pub outcomes: Vec<OutcomeEntry>,
    /// Failures as `kind@provider`, in attempt order
    pub fallback_chain: Vec<String>,
    /// End-to-end latency
    pub total_latency_ms: u64,
    /// Tokens of the served response
    pub usage: Usage,
    /// Estimated spend in dollars
    pub cost_usd: f64,
    /// Terminal error code, when the request failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl RoutingRecord {
    /// Build the record for a finished decision
    #[must_use]
    pub fn from_decision(
        decision: &RoutingDecision,
        error: Option<&GatewayError>,
        pricing: &PricingTable,
    ) -> Self {
        let mut outcomes: Vec<OutcomeEntry> = decision
            .attempts
            .iter()
            .map(|attempt| {
                let (status, error_kind) = match attempt.status {
                    AttemptStatus::Succeeded => ("succeeded", None),
                    AttemptStatus::Failed(kind) => ("failed", Some(kind)),
                    AttemptStatus::Superseded => ("superseded", None),
                };
                OutcomeEntry {
                    provider: Some(attempt.provider),
                    key_role: attempt.key_role,
                    status: status.to_string(),
                    error_kind,
                    latency_ms: duration_ms(attempt.latency),
                    hedged: attempt.hedged,
                }
            })
            .collect();

        if outcomes.is_empty() {
            outcomes.push(OutcomeEntry {
                provider: None,
                key_role: None,
                status: decision.state.as_str().to_string(),
                error_kind: None,
                latency_ms: duration_ms(decision.total_latency),
                hedged: false,
            });
        }

        Self {
            request_id: decision.request_id.as_str().to_string(),
            timestamp: Utc::now(),
            tier: decision.tier,
            state: decision.state,
            provider_used: decision.provider_used,
            candidates: decision.candidates.clone(),
            outcomes,
            fallback_chain: decision.failures().iter().map(ToString::to_string).collect(),
            total_latency_ms: duration_ms(decision.total_latency),
            usage: decision.usage,
            cost_usd: pricing.estimate_decision(decision),
            error_code: error.map(|e| e.error_code().to_string()),
        }
    }

    /// Whether a provider served the request
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.provider_used.is_some()
    }

    /// Short outcome label used for metric labels
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        match self.state {
            RoutingState::Succeeded => "success",
            RoutingState::NoProviderAvailable => "no_provider",
            RoutingState::DeadlineExceeded => "deadline",
            _ => "exhausted",
        }
    }
}

fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Destination for routing records. Implementations must not block.
pub trait RecordSink: Send + Sync {
    /// Sink name for diagnostics
    fn name(&self) -> &'static str;

    /// Accept one record
    fn emit(&self, record: &RoutingRecord) -> Result<(), TelemetryError>;
}

/// Writes each record as a single JSON `info` event on the `routing` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn emit(&self, record: &RoutingRecord) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(record)?;
        info!(
            target: "routing",
            request_id = %record.request_id,
            tier = %record.tier,
            provider = ?record.provider_used,
            state = %record.state,
            latency_ms = record.total_latency_ms,
            record = %line,
            "Routed request"
        );
        Ok(())
    }
}

/// Forwards records over a bounded channel to a consumer task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<RoutingRecord>,
}

impl ChannelSink {
    /// Create a sink and its receiving end
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RoutingRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl RecordSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn emit(&self, record: &RoutingRecord) -> Result<(), TelemetryError> {
        self.sender.try_send(record.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TelemetryError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => TelemetryError::ChannelClosed,
        })
    }
}

/// Keeps records in memory; handy in tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<RoutingRecord>>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records seen so far
    #[must_use]
    pub fn records(&self) -> Vec<RoutingRecord> {
        self.records.lock().clone()
    }

    /// Number of records seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn emit(&self, record: &RoutingRecord) -> Result<(), TelemetryError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Fans finished decisions out to the configured sinks
pub struct ObservabilityRecorder {
    sinks: Vec<Arc<dyn RecordSink>>,
    pricing: PricingTable,
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl Default for ObservabilityRecorder {
    fn default() -> Self {
        Self::new(PricingTable::new())
    }
}

impl ObservabilityRecorder {
    /// Recorder with no sinks
    #[must_use]
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            sinks: Vec::new(),
            pricing,
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add a sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Pricing used for cost estimates
    #[must_use]
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Emit the record for a finished decision. Never fails.
    pub fn record(&self, decision: &RoutingDecision, error: Option<&GatewayError>) -> RoutingRecord {
        let record = RoutingRecord::from_decision(decision, error, &self.pricing);
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&record) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), error = %e, request_id = %record.request_id, "Dropped routing record");
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
        record
    }

    /// Records emitted
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Sink deliveries that failed
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ObservabilityRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityRecorder")
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("recorded", &self.recorded())
            .field("dropped", &self.dropped_records())
            .finish()
    }
}
