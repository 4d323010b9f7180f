//! Static per-token pricing used for cost estimates.

use crate::response::Usage;
use crate::types::ProviderId;
use serde::{Deserialize, Serialize};

/// Dollar price per 1k tokens for one provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    /// Prompt token price
    pub input_per_1k: f64,
    /// Completion token price
    pub output_per_1k: f64,
}

impl TokenPricing {
    /// Create a price pair
    #[must_use]
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Published list price of each provider's default model
    #[must_use]
    pub fn default_for(provider: ProviderId) -> Self {
        match provider {
            // llama-3.3-70b
            ProviderId::Cerebras => Self::new(0.000_85, 0.001_2),
            // gemini-2.0-flash
            ProviderId::Gemini => Self::new(0.000_1, 0.000_4),
            // llama-3.3-70b-versatile
            ProviderId::Groq => Self::new(0.000_59, 0.000_79),
        }
    }

    /// Estimated cost of `usage` in dollars
    #[must_use]
    pub fn cost(&self, usage: &Usage) -> f64 {
        (f64::from(usage.prompt_tokens) / 1000.0) * self.input_per_1k
            + (f64::from(usage.completion_tokens) / 1000.0) * self.output_per_1k
    }
}
