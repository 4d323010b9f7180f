//! JSON response envelope printed by the `route` command.

use chrono::{DateTime, Utc};
use gateway_core::{CompletionResponse, GatewayError, RoutingDecision};
use gateway_routing::RoutedResult;
use gateway_telemetry::RoutingRecord;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Outcome wrapper in the shape the web layer answers with
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    /// Whether a provider served the request
    pub success: bool,
    /// HTTP status the web layer would answer with
    pub status: u16,
    /// Wall-clock time spent in the router
    pub processing_time_ms: u64,
    /// When the envelope was built
    pub timestamp: DateTime<Utc>,
    /// Correlation id
    pub request_id: &'a str,
    /// The served response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a CompletionResponse>,
    /// Public error body; never names providers or keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Routing trace, only when asked for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<Trace<'a>>,
}

/// Internal routing detail
#[derive(Debug, Serialize)]
pub struct Trace<'a> {
    /// Full decision
    pub decision: &'a RoutingDecision,
    /// Record handed to the sinks
    pub record: &'a RoutingRecord,
}

impl<'a> Envelope<'a> {
    /// Build the envelope for a routed request
    pub fn new(routed: &'a RoutedResult, elapsed: Duration, with_trace: bool) -> Self {
        let (data, error, status) = match &routed.result {
            Ok(response) => (Some(response), None, 200),
            Err(error) => (None, Some(error.public_body()), error.status_code().as_u16()),
        };
        Self {
            success: routed.is_success(),
            status,
            processing_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
            request_id: routed.decision.request_id.as_str(),
            data,
            error,
            routing: with_trace.then_some(Trace {
                decision: &routed.decision,
                record: &routed.record,
            }),
        }
    }
}

/// Process exit status for a routed request: 0 served, 3 unavailable, 4 timed out
pub fn exit_status(routed: &RoutedResult) -> u8 {
    match &routed.result {
        Ok(_) => 0,
        Err(GatewayError::DeadlineExceeded { .. }) => 4,
        Err(GatewayError::NoAvailableProvider { .. } | GatewayError::AllProvidersExhausted { .. }) => 3,
        Err(_) => 1,
    }
}
