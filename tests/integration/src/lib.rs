//! Integration tests for the itinerary router
//!
//! Covers the routing pipeline end to end:
//! - Tiering, fallback and deadline scenarios over scripted providers
//! - Key rotation and health self-healing in the shared registry
//! - Routing record completeness
//! - HTTP adapters against mock provider APIs

pub mod helpers;

pub use helpers::*;

#[cfg(test)]
mod adapter_tests;
#[cfg(test)]
mod health_tests;
#[cfg(test)]
mod observability_tests;
#[cfg(test)]
mod scenario_tests;
