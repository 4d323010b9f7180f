//! Complexity classification.
//!
//! A pure function of the request: prompt length picks the base tier, and
//! requests demanding high-capability features are promoted to at least
//! medium. A request with no prompt is low.

use gateway_config::ClassifierConfig;
use gateway_core::{ComplexityTier, RoutingRequest, TaskKind};
use serde::Serialize;
use tracing::debug;

/// Feature that lifted a request above its length tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Promotion {
    /// JSON or schema output requested
    StructuredOutput,
    /// Multi-step reasoning flag set
    MultiStepReasoning,
    /// Large `max_tokens`
    LargeOutput,
    /// Planning task
    Planning,
}

/// Classification result with its inputs, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Final tier
    pub tier: ComplexityTier,
    /// Tier from prompt length alone
    pub length_tier: ComplexityTier,
    /// Prompt length in characters
    pub prompt_chars: usize,
    /// First feature that forced promotion, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_by: Option<Promotion>,
}

/// Assigns a complexity tier to each request
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier {
    config: ClassifierConfig,
}

impl ComplexityClassifier {
    /// Create a classifier with the given thresholds
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Tier for a request
    #[must_use]
    pub fn classify(&self, request: &RoutingRequest) -> ComplexityTier {
        self.explain(request).tier
    }

    /// Tier for a request with the reasoning behind it
    #[must_use]
    pub fn explain(&self, request: &RoutingRequest) -> Classification {
        let prompt_chars = request.prompt_chars();
        let length_tier = if prompt_chars > self.config.high_chars {
            ComplexityTier::High
        } else if prompt_chars > self.config.medium_chars {
            ComplexityTier::Medium
        } else {
            ComplexityTier::Low
        };

        let promoted_by = self.promotion(request);
        let tier = if promoted_by.is_some() {
            length_tier.max(ComplexityTier::Medium)
        } else {
            length_tier
        };

        let classification = Classification {
            tier,
            length_tier,
            prompt_chars,
            promoted_by,
        };
        debug!(
            request_id = %request.request_id,
            tier = %tier,
            prompt_chars,
            promoted_by = ?promoted_by,
            "Classified request"
        );
        classification
    }

    fn promotion(&self, request: &RoutingRequest) -> Option<Promotion> {
        let options = &request.options;
        if options.response_format.is_structured() {
            Some(Promotion::StructuredOutput)
        } else if options.multi_step_reasoning {
            Some(Promotion::MultiStepReasoning)
        } else if options
            .max_tokens
            .is_some_and(|max| max >= self.config.large_output_tokens)
        {
            Some(Promotion::LargeOutput)
        } else if self.config.promote_planning && options.task == TaskKind::Planning {
            Some(Promotion::Planning)
        } else {
            None
        }
    }
}
