//! # Gateway Resilience
//!
//! Resilience primitives for the itinerary router:
//! - Error-rate circuit breaker deciding whether a provider is healthy
//! - Attempt budget splitting the request deadline across candidates

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod timeout;

// Re-export main types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use timeout::AttemptBudget;
