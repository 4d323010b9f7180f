//! # Gateway Core
//!
//! Core types, the adapter trait, and error handling for the itinerary LLM
//! router.
//!
//! This crate provides the foundational types used throughout the router:
//! - Closed identifiers (providers, key roles, complexity tiers)
//! - Routing and completion request/response types
//! - The [`LLMProvider`] adapter trait
//! - Classified provider errors and terminal router errors
//! - The per-request [`RoutingDecision`] trace

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decision;
pub mod error;
pub mod pricing;
pub mod provider;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types
pub use decision::{AttemptRecord, AttemptStatus, RoutingDecision, RoutingState};
pub use error::{AttemptFailure, ErrorKind, GatewayError, GatewayResult, ProviderError};
pub use pricing::TokenPricing;
pub use provider::{LLMProvider, ProviderOutcome};
pub use request::{
    ChatMessage, CompletionRequest, MessageRole, RequestOptions, ResponseFormat, RoutingRequest,
    TaskKind,
};
pub use response::{CompletionResponse, Usage};
pub use types::{ComplexityTier, KeyRole, ProviderId, RequestId, UnknownProvider};
