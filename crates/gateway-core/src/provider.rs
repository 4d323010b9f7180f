//! Provider adapter abstraction.
//!
//! Adapters are deliberately thin: one completion call and one cheap probe.
//! Key rotation, quota and health live in the registry, which hands the
//! adapter the key to use on each call.

use crate::error::{ErrorKind, ProviderError};
use crate::request::CompletionRequest;
use crate::response::{CompletionResponse, Usage};
use crate::types::ProviderId;
use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Duration;

/// Uniform interface over one upstream LLM backend
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider identity
    fn id(&self) -> ProviderId;

    /// Model requested from the provider
    fn model(&self) -> &str;

    /// Run one completion with the given key.
    ///
    /// Every provider-specific failure must be mapped to a classified
    /// [`ProviderError`]. Structured formats must be validated here so a
    /// schema violation surfaces as [`ErrorKind::MalformedResponse`].
    async fn generate(
        &self,
        request: &CompletionRequest,
        api_key: &SecretString,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Lightweight capability probe used by health checks
    async fn probe(&self, api_key: &SecretString) -> Result<(), ProviderError>;
}

/// Outcome of one attempt as fed back to the registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderOutcome {
    /// The provider answered
    Success {
        /// Call latency
        latency: Duration,
        /// Tokens consumed
        usage: Usage,
    },
    /// The attempt failed
    Failure {
        /// Classified kind
        kind: ErrorKind,
        /// Time spent before failing
        latency: Duration,
        /// Provider backoff hint
        retry_after: Option<Duration>,
    },
}

impl ProviderOutcome {
    /// Outcome for a classified adapter error
    #[must_use]
    pub fn from_error(error: &ProviderError, latency: Duration) -> Self {
        Self::Failure {
            kind: error.kind,
            latency,
            retry_after: error.retry_after,
        }
    }

    /// Outcome for a successful response
    #[must_use]
    pub fn from_response(response: &CompletionResponse) -> Self {
        Self::Success {
            latency: response.latency,
            usage: response.usage,
        }
    }

    /// Whether the attempt succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Latency of the attempt
    #[must_use]
    pub fn latency(&self) -> Duration {
        match self {
            Self::Success { latency, .. } | Self::Failure { latency, .. } => *latency,
        }
    }
}
