//! # Gateway Routing
//!
//! Request routing for the itinerary LLM router.
//!
//! This crate provides:
//! - The [`ComplexityClassifier`] assigning each request a tier
//! - The [`RoutingEngine`] building the ordered candidate list
//! - The [`FallbackExecutor`] walking that list under a deadline, with
//!   optional hedging
//! - The [`RoutingPipeline`] tying classification, execution and recording
//!   together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classifier;
pub mod fallback;
pub mod pipeline;
pub mod router;

// Re-export main types
pub use classifier::{Classification, ComplexityClassifier, Promotion};
pub use fallback::FallbackExecutor;
pub use pipeline::{RoutedResult, RoutingPipeline};
pub use router::RoutingEngine;
