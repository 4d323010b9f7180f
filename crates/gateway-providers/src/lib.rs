//! # Gateway Providers
//!
//! Provider adapters and the provider health store for the itinerary router.
//!
//! This crate provides:
//! - HTTP adapters for Cerebras, Google Gemini and Groq
//! - API key slots with quota tracking and rotation
//! - The [`ProviderRegistry`], owner of all provider health state
//! - A scripted adapter for tests (`mock` feature)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cerebras;
pub mod factory;
pub mod gemini;
pub mod groq;
pub mod keys;
pub mod openai_compat;
pub mod registry;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export main types
pub use factory::{build_registry, builder_from_config, http_adapter, settings_from_config};
pub use gemini::GeminiProvider;
pub use keys::{ApiKeySlot, KeyLease, KeyPolicy, KeyRing, KeySlotSnapshot};
pub use openai_compat::{OpenAiCompatProvider, SchemaSupport};
pub use registry::{
    ProviderEntry, ProviderHealth, ProviderMetrics, ProviderRegistry, ProviderSettings,
    RegistryBuilder, UnhealthyReason,
};
pub use transport::{build_client, AdapterConfig};
