//! Google Gemini adapter.
//!
//! Uses the Google AI Studio API:
//! `POST {base}/models/{MODEL}:generateContent` with the key in the
//! `x-goog-api-key` header so it never appears in URLs or logs.

use crate::transport::{self, AdapterConfig};
use async_trait::async_trait;
use gateway_core::{
    CompletionRequest, CompletionResponse, GatewayError, LLMProvider, MessageRole, ProviderError,
    ProviderId, Usage,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Default connection settings
#[must_use]
pub fn default_config() -> AdapterConfig {
    AdapterConfig::new(DEFAULT_BASE_URL, DEFAULT_MODEL)
}

/// Gemini adapter
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    config: AdapterConfig,
    client: Client,
}

impl GeminiProvider {
    /// Create a new Gemini adapter
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        let client = transport::build_client(config.timeout)?;
        Ok(Self { config, client })
    }

    /// Adapter configuration
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    /// Transform a completion request to Gemini's format
    fn transform_request(request: &CompletionRequest) -> GeminiRequest {
        let mut contents = Vec::new();
        let mut system_instruction = None;

        for message in &request.messages {
            let part = GeminiPart {
                text: message.content.clone(),
            };
            match message.role {
                MessageRole::System => {
                    system_instruction = Some(GeminiContent {
                        role: None,
                        parts: vec![part],
                    });
                }
                MessageRole::User => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![part],
                }),
                MessageRole::Assistant => contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![part],
                }),
            }
        }

        let response_mime_type = request
            .response_format
            .is_structured()
            .then(|| "application/json".to_string());

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type,
            },
        }
    }

    /// Pull the candidate text out of a reply
    fn extract(&self, response: GeminiResponse) -> Result<(String, Usage), ProviderError> {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(ProviderError::malformed(
                ProviderId::Gemini,
                format!("Prompt blocked: {reason}"),
            ));
        }

        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            ProviderError::malformed(ProviderId::Gemini, "No candidates in response")
        })?;

        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = response
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok((text, usage))
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        api_key: &SecretString,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = Self::transform_request(request);

        debug!(
            provider = "gemini",
            model = %self.config.model,
            structured = request.response_format.is_structured(),
            "Sending generateContent request"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint_url())
            .header(API_KEY_HEADER, api_key.expose_secret().as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport::send_error(ProviderId::Gemini, &e))?;

        let body = transport::read_body(ProviderId::Gemini, response).await?;
        let parsed: GeminiResponse = transport::decode(ProviderId::Gemini, &body)?;
        let (text, usage) = self.extract(parsed)?;

        transport::finish_response(
            ProviderId::Gemini,
            &self.config.model,
            request,
            Some(text),
            usage,
            started,
        )
    }

    async fn probe(&self, api_key: &SecretString) -> Result<(), ProviderError> {
        let url = format!("{}/models?pageSize=1", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, api_key.expose_secret().as_str())
            .send()
            .await
            .map_err(|e| transport::send_error(ProviderId::Gemini, &e))?;
        transport::read_body(ProviderId::Gemini, response)
            .await
            .map(|_| ())
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
