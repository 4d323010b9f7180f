//! Cerebras inference adapter.

use crate::openai_compat::{OpenAiCompatProvider, SchemaSupport};
use crate::transport::AdapterConfig;
use gateway_core::{GatewayError, ProviderId};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "llama-3.3-70b";

/// Default connection settings
#[must_use]
pub fn default_config() -> AdapterConfig {
    AdapterConfig::new(DEFAULT_BASE_URL, DEFAULT_MODEL)
}

/// Build the Cerebras adapter. Cerebras honours full JSON schemas.
///
/// # Errors
/// Returns error if HTTP client cannot be created
pub fn provider(config: AdapterConfig) -> Result<OpenAiCompatProvider, GatewayError> {
    OpenAiCompatProvider::new(ProviderId::Cerebras, config, SchemaSupport::JsonSchema)
}
