//! Error types for the router.
//!
//! Two layers exist:
//! - [`ProviderError`]: a single adapter call failed, classified into an
//!   [`ErrorKind`]. These are recovered locally by falling back to the next
//!   candidate and never reach the caller directly.
//! - [`GatewayError`]: terminal outcomes surfaced to the caller.

use crate::types::{ComplexityTier, ProviderId};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result alias for terminal router operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Classified kind of a failed provider attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, 5xx, network trouble
    Transient,
    /// Quota or rate limit exhausted for the key
    Quota,
    /// Key rejected
    Auth,
    /// Provider replied but the payload was unusable
    MalformedResponse,
}

impl ErrorKind {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::MalformedResponse => "malformed_response",
        }
    }

    /// Whether this kind reflects on the provider's health rather than its key
    #[must_use]
    pub fn counts_against_health(self) -> bool {
        match self {
            Self::Transient | Self::MalformedResponse => true,
            Self::Quota | Self::Auth => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from one provider adapter call
#[derive(Debug, Clone, Error)]
#[error("{kind} error from {provider}: {message}")]
pub struct ProviderError {
    /// Provider that failed
    pub provider: ProviderId,
    /// Classified kind
    pub kind: ErrorKind,
    /// Internal message (may contain upstream text; never shown to end users)
    pub message: String,
    /// HTTP status when the provider replied
    pub status_code: Option<u16>,
    /// Provider-supplied backoff hint
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create a classified error
    pub fn new(provider: ProviderId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
            status_code: None,
            retry_after: None,
        }
    }

    /// Transient failure (timeout, 5xx, network)
    pub fn transient(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Transient, message)
    }

    /// Quota or rate limit failure
    pub fn quota(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Quota, message)
    }

    /// Authentication failure
    pub fn auth(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Auth, message)
    }

    /// Malformed or schema-violating response
    pub fn malformed(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::MalformedResponse, message)
    }

    /// Attach the HTTP status
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attach a backoff hint
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Classify an HTTP error status the way every adapter does.
    ///
    /// Adapters refine this with body inspection where a provider reports
    /// auth or quota problems under a generic status.
    pub fn from_status(provider: ProviderId, status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            429 => ErrorKind::Quota,
            _ => ErrorKind::Transient,
        };
        Self::new(provider, kind, message).with_status(status)
    }
}

/// One failed candidate in a fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Provider attempted
    pub provider: ProviderId,
    /// Classified kind
    pub kind: ErrorKind,
    /// Internal detail for operators
    pub detail: String,
}

impl AttemptFailure {
    /// Build from a classified provider error
    #[must_use]
    pub fn from_error(error: &ProviderError) -> Self {
        Self {
            provider: error.provider,
            kind: error.kind,
            detail: error.message.clone(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.provider)
    }
}

/// Terminal router errors
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No candidate passed the availability filter
    #[error("no provider available for {tier} tier request")]
    NoAvailableProvider {
        /// Tier the request was classified as
        tier: ComplexityTier,
    },

    /// Every candidate was attempted and failed
    #[error("all providers exhausted: {}", format_failures(.failures))]
    AllProvidersExhausted {
        /// One entry per attempted candidate, in attempt order
        failures: Vec<AttemptFailure>,
    },

    /// The overall time budget ran out mid-chain
    #[error("deadline of {}ms exceeded after {} attempt(s)", .deadline.as_millis(), .failures.len())]
    DeadlineExceeded {
        /// The overall deadline that elapsed
        deadline: Duration,
        /// Attempts that failed before the deadline
        failures: Vec<AttemptFailure>,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Unexpected internal failure
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

fn format_failures(failures: &[AttemptFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl GatewayError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status the excluded HTTP layer should answer with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoAvailableProvider { .. } | Self::AllProvidersExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoAvailableProvider { .. } => "no_available_provider",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Generic end-user message. Never includes provider names, key roles or
    /// upstream error text.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NoAvailableProvider { .. } | Self::AllProvidersExhausted { .. } => {
                "The itinerary service is temporarily unavailable, please retry shortly."
            }
            Self::DeadlineExceeded { .. } => {
                "Generating your itinerary took too long, please retry."
            }
            Self::Configuration { .. } | Self::Internal { .. } => {
                "An unexpected error occurred."
            }
        }
    }

    /// Public JSON body for the HTTP layer
    #[must_use]
    pub fn public_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.public_message(),
            }
        })
    }

    /// Per-candidate failures carried by this error
    #[must_use]
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            Self::AllProvidersExhausted { failures } | Self::DeadlineExceeded { failures, .. } => {
                failures
            }
            Self::NoAvailableProvider { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                &[]
            }
        }
    }
}
