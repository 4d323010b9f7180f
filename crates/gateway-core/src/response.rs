//! Response types returned by adapters.

use crate::types::ProviderId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Add;
use std::time::Duration;

/// Token usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl Usage {
    /// Create a new usage record
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            self.completion_tokens.saturating_add(rhs.completion_tokens),
        )
    }
}

/// Uniform adapter response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Provider that produced the answer
    pub provider: ProviderId,
    /// Model name reported by the provider
    pub model: String,
    /// Raw response text
    pub text: String,
    /// Parsed payload when a structured format was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    /// Token usage
    pub usage: Usage,
    /// Wall-clock latency of the provider call
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

impl CompletionResponse {
    /// Create a text response
    pub fn new(provider: ProviderId, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            text: text.into(),
            structured: None,
            usage: Usage::default(),
            latency: Duration::ZERO,
        }
    }

    /// Attach token usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Attach latency
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Attach the parsed structured payload
    #[must_use]
    pub fn with_structured(mut self, structured: Option<Value>) -> Self {
        self.structured = structured;
        self
    }
}

/// Serialize durations as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
