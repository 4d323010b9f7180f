//! Telemetry error types.

use thiserror::Error;

/// A sink failed to accept a record
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Bounded channel is full
    #[error("record channel full")]
    ChannelFull,

    /// Receiver dropped
    #[error("record channel closed")]
    ChannelClosed,

    /// Record could not be serialized
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Metric registration or update failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
