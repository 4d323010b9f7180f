//! # Gateway Telemetry
//!
//! Observability for the itinerary router.
//!
//! This crate provides:
//! - The [`ObservabilityRecorder`] and its per-request [`RoutingRecord`]
//! - Record sinks: tracing JSON line, bounded channel, in-memory, Prometheus
//! - Static per-provider pricing for cost estimates
//! - Tracing subscriber setup with optional OpenTelemetry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cost;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod tracing_setup;

// Re-export main types
pub use cost::PricingTable;
pub use error::TelemetryError;
pub use metrics::MetricsSink;
pub use recorder::{
    ChannelSink, MemorySink, ObservabilityRecorder, OutcomeEntry, RecordSink, RoutingRecord,
    TracingSink,
};
pub use tracing_setup::{init_tracing, shutdown_tracing, LogStyle, TracingConfig, TracingError};
