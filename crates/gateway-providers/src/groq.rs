//! Groq adapter.

use crate::openai_compat::{OpenAiCompatProvider, SchemaSupport};
use crate::transport::AdapterConfig;
use gateway_core::{GatewayError, ProviderId};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Default connection settings
#[must_use]
pub fn default_config() -> AdapterConfig {
    AdapterConfig::new(DEFAULT_BASE_URL, DEFAULT_MODEL)
}

/// Build the Groq adapter. Schemas are sent as `json_object` and enforced
/// by local validation.
///
/// # Errors
/// Returns error if HTTP client cannot be created
pub fn provider(config: AdapterConfig) -> Result<OpenAiCompatProvider, GatewayError> {
    OpenAiCompatProvider::new(ProviderId::Groq, config, SchemaSupport::JsonObject)
}
