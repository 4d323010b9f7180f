//! OpenAI-compatible chat completions adapter.
//!
//! Cerebras and Groq both expose `POST {base}/chat/completions` with bearer
//! auth. They differ in defaults and in how much of the `response_format`
//! object they honour, which [`SchemaSupport`] captures.

use crate::transport::{self, AdapterConfig};
use async_trait::async_trait;
use gateway_core::{
    CompletionRequest, CompletionResponse, GatewayError, LLMProvider, MessageRole, ProviderError,
    ProviderId, ResponseFormat, Usage,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

/// How a provider accepts structured-output requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSupport {
    /// Full `json_schema` response format
    JsonSchema,
    /// Only `json_object`; schemas are enforced by local validation
    JsonObject,
}

/// Adapter for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    id: ProviderId,
    config: AdapterConfig,
    schema_support: SchemaSupport,
    client: Client,
}

impl OpenAiCompatProvider {
    /// Create an adapter
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created
    pub fn new(
        id: ProviderId,
        config: AdapterConfig,
        schema_support: SchemaSupport,
    ) -> Result<Self, GatewayError> {
        let client = transport::build_client(config.timeout)?;
        Ok(Self {
            id,
            config,
            schema_support,
            client,
        })
    }

    /// Adapter configuration
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn transform_request(&self, request: &CompletionRequest) -> ChatRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| ChatMessageBody {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect();

        let response_format = match (&request.response_format, self.schema_support) {
            (ResponseFormat::Text, _) => None,
            (ResponseFormat::JsonObject, _) | (ResponseFormat::JsonSchema { .. }, SchemaSupport::JsonObject) => {
                Some(json!({"type": "json_object"}))
            }
            (ResponseFormat::JsonSchema { name, schema }, SchemaSupport::JsonSchema) => Some(json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema, "strict": true},
            })),
        };

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
            response_format,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        api_key: &SecretString,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.transform_request(request);

        debug!(
            provider = %self.id,
            model = %self.config.model,
            structured = request.response_format.is_structured(),
            "Sending chat completion request"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport::send_error(self.id, &e))?;

        let body = transport::read_body(self.id, response).await?;
        let parsed: ChatResponse = transport::decode(self.id, &body)?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        let usage = parsed
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        transport::finish_response(self.id, &self.config.model, request, text, usage, started)
    }

    async fn probe(&self, api_key: &SecretString) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key.expose_secret())
            .send()
            .await
            .map_err(|e| transport::send_error(self.id, &e))?;
        transport::read_body(self.id, response).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessageBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessageBody {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
