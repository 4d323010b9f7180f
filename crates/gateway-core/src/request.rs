//! Request types for the router.
//!
//! [`RoutingRequest`] is what the excluded HTTP/CLI layer hands in. It is
//! turned into the uniform [`CompletionRequest`] that every adapter receives.

use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of work the caller is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Free-form travel question
    #[default]
    Question,
    /// Full itinerary generation
    Planning,
}

/// Desired shape of the provider's answer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text
    #[default]
    Text,
    /// Any JSON object
    JsonObject,
    /// JSON object matching a schema
    JsonSchema {
        /// Schema name passed to providers that support it
        name: String,
        /// JSON schema document
        schema: Value,
    },
}

impl ResponseFormat {
    /// Whether the caller demands machine-readable output
    #[must_use]
    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Check a provider's raw text against this format.
    ///
    /// Returns the parsed payload for structured formats and `None` for text.
    /// JSON may arrive wrapped in Markdown code fences.
    ///
    /// # Errors
    /// Returns a description of the violation when the text does not fit.
    pub fn validate(&self, text: &str) -> Result<Option<Value>, String> {
        let schema = match self {
            Self::Text => return Ok(None),
            Self::JsonObject => None,
            Self::JsonSchema { schema, .. } => Some(schema),
        };

        let payload: Value = serde_json::from_str(strip_code_fences(text))
            .map_err(|e| format!("response is not valid JSON: {e}"))?;

        let Some(object) = payload.as_object() else {
            return Err("response JSON is not an object".to_string());
        };

        if let Some(required) = schema
            .and_then(|s| s.get("required"))
            .and_then(Value::as_array)
        {
            let missing: Vec<&str> = required
                .iter()
                .filter_map(Value::as_str)
                .filter(|key| !object.contains_key(*key))
                .collect();
            if !missing.is_empty() {
                return Err(format!("response missing required keys: {}", missing.join(", ")));
            }
        }

        Ok(Some(payload))
    }
}

/// Remove a surrounding ```json ... ``` fence if present
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let body = rest.strip_suffix("```").unwrap_or(rest);

    // Drop an info string (e.g. "json") ahead of the payload, which may sit
    // on the same line as the fence
    let tag_len = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    match body[tag_len..].trim() {
        "" => body.trim(),
        payload => payload,
    }
}

/// Optional caller controls
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Upper bound on generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Desired response format
    pub response_format: ResponseFormat,

    /// Caller wants live search results folded in (handled outside the router)
    pub include_web_search: bool,

    /// Cache similarity threshold (handled outside the router)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,

    /// Caller flags the task as needing multi-step reasoning
    pub multi_step_reasoning: bool,

    /// Kind of work requested
    pub task: TaskKind,
}

/// Inbound routing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Correlation ID for logs; generated when absent
    #[serde(default = "RequestId::generate")]
    pub request_id: RequestId,

    /// User prompt; `None` is treated as the minimal request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// System instructions prepended to the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Caller options
    #[serde(default)]
    pub options: RequestOptions,
}

impl RoutingRequest {
    /// Create a request for a prompt with default options
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Set the correlation ID
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = id;
        self
    }

    /// Set system instructions
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the response format
    #[must_use]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.options.response_format = format;
        self
    }

    /// Set the token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    /// Set the task kind
    #[must_use]
    pub fn with_task(mut self, task: TaskKind) -> Self {
        self.options.task = task;
        self
    }

    /// Flag the request as needing multi-step reasoning
    #[must_use]
    pub fn with_multi_step_reasoning(mut self, enabled: bool) -> Self {
        self.options.multi_step_reasoning = enabled;
        self
    }

    /// Prompt length in characters, zero when absent
    #[must_use]
    pub fn prompt_chars(&self) -> usize {
        self.prompt.as_deref().map_or(0, |p| p.chars().count())
    }
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// End-user content
    User,
    /// Model output
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: MessageRole,
    /// Text content
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Uniform request passed to every adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation, system message first when present
    pub messages: Vec<ChatMessage>,

    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Desired response format
    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Streaming flag; carried for adapters, completions are collected whole
    #[serde(default)]
    pub stream: bool,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Build the adapter request for an inbound routing request
    #[must_use]
    pub fn from_routing(request: &RoutingRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(request.prompt.clone().unwrap_or_default()));

        Self {
            messages,
            max_tokens: request.options.max_tokens,
            response_format: request.options.response_format.clone(),
            stream: false,
            temperature: None,
        }
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// System instructions, if any
    #[must_use]
    pub fn system_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    /// Total characters across all messages
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}
