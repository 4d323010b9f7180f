//! Shared HTTP plumbing for the adapters: client construction, error
//! classification and response validation.

use chrono::{DateTime, Utc};
use gateway_core::{
    CompletionRequest, CompletionResponse, ErrorKind, GatewayError, ProviderError, ProviderId,
    Usage,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Connection settings for one HTTP adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Model to request
    pub model: String,
    /// Client-side ceiling on a single HTTP exchange
    pub timeout: Duration,
}

impl AdapterConfig {
    /// Create a configuration
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Build the pooled client each adapter owns
///
/// # Errors
/// Returns error if the TLS backend cannot be initialized
pub fn build_client(timeout: Duration) -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(100)
        .build()
        .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))
}

/// Classify a transport error (no HTTP response received)
pub(crate) fn send_error(provider: ProviderId, error: &reqwest::Error) -> ProviderError {
    let what = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    warn!(provider = %provider, error = %error, "Provider {what}");
    ProviderError::transient(provider, format!("Request {what}: {error}"))
}

/// Parse a `Retry-After` header, either delta-seconds or an HTTP date
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

/// Classify a non-success HTTP reply.
///
/// Status decides first; body markers catch providers that report quota or
/// key problems under a generic status.
pub(crate) fn classify_status(
    provider: ProviderId,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    let lower = body.to_ascii_lowercase();
    let message = format!("HTTP {status}: {}", truncate(body, 512));

    let error = if status == 400
        && (body.contains("API_KEY_INVALID") || lower.contains("api key not valid"))
    {
        ProviderError::auth(provider, message).with_status(status)
    } else if matches!(status, 400 | 402 | 404..=428 | 430..=499)
        && (body.contains("RESOURCE_EXHAUSTED")
            || lower.contains("quota")
            || lower.contains("rate limit"))
    {
        ProviderError::quota(provider, message).with_status(status)
    } else {
        ProviderError::from_status(provider, status, message)
    };

    debug!(provider = %provider, status, kind = %error.kind, "Classified provider error");
    error.with_retry_after(retry_after)
}

/// Read a reply body, classifying non-success statuses
pub(crate) async fn read_body(provider: ProviderId, response: Response) -> Result<String, ProviderError> {
    let status = response.status();
    let hint = retry_after(response.headers());
    let body = response.text().await.map_err(|e| {
        ProviderError::transient(provider, format!("Failed to read response: {e}"))
    })?;

    trace!(provider = %provider, status = %status, body = %body, "Received provider response");

    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_status(provider, status.as_u16(), &body, hint))
    }
}

/// Decode a success body
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    provider: ProviderId,
    body: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(provider, format!("Invalid response JSON: {e}")))
}

/// Validate extracted text against the requested format and assemble the
/// uniform response
pub(crate) fn finish_response(
    provider: ProviderId,
    model: &str,
    request: &CompletionRequest,
    text: Option<String>,
    usage: Usage,
    started: Instant,
) -> Result<CompletionResponse, ProviderError> {
    let text = text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::malformed(provider, "Response contained no text"));
    }

    let structured = request
        .response_format
        .validate(&text)
        .map_err(|violation| ProviderError::new(provider, ErrorKind::MalformedResponse, violation))?;

    Ok(CompletionResponse::new(provider, model, text)
        .with_usage(usage)
        .with_structured(structured)
        .with_latency(started.elapsed()))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
