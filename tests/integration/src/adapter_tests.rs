//! HTTP adapters against mock provider APIs

use crate::helpers::init_tracing;
use gateway_config::RouterConfig;
use gateway_core::{
    ComplexityTier, ErrorKind, GatewayError, ProviderId, ResponseFormat, RoutingRequest,
};
use gateway_providers::build_registry;
use gateway_routing::RoutingPipeline;
use gateway_telemetry::{MemorySink, ObservabilityRecorder};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_KEY: &str = "gemini-test-key";
const GROQ_KEY: &str = "groq-test-key";

struct Servers {
    gemini: MockServer,
    groq: MockServer,
}

impl Servers {
    async fn start() -> Self {
        init_tracing();
        Self {
            gemini: MockServer::start().await,
            groq: MockServer::start().await,
        }
    }

    /// Gemini and Groq pointed at the mock servers, Cerebras off.
    /// Cold-start probing is off so only the generate mocks are hit.
    fn config(&self, low: Vec<ProviderId>) -> RouterConfig {
        let mut config = RouterConfig::default();
        config.health.probe_on_cold_start = false;

        let gemini = config.providers.get_mut(ProviderId::Gemini);
        gemini.base_url = Some(self.gemini.uri());
        gemini.model = Some("gemini-test".to_string());
        gemini.keys = vec![SecretString::new(GEMINI_KEY.to_string())];

        let groq = config.providers.get_mut(ProviderId::Groq);
        groq.base_url = Some(self.groq.uri());
        groq.model = Some("groq-test".to_string());
        groq.keys = vec![SecretString::new(GROQ_KEY.to_string())];

        config.providers.get_mut(ProviderId::Cerebras).enabled = false;
        config.routing.low = low;
        config
    }
}

fn pipeline(config: &RouterConfig) -> (RoutingPipeline, Arc<MemorySink>) {
    let registry = Arc::new(build_registry(config).unwrap());
    let sink = Arc::new(MemorySink::new());
    let recorder = Arc::new(ObservabilityRecorder::default().with_sink(sink.clone()));
    (RoutingPipeline::from_config(config, registry, recorder), sink)
}

fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 30}
    }))
}

fn chat_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 9, "completion_tokens": 21}
    }))
}

#[tokio::test]
async fn test_gemini_quota_falls_back_to_groq() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/models/gemini-test:generateContent$"))
        .and(header("x-goog-api-key", GEMINI_KEY))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_json(json!({
                    "error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "Quota exceeded"}
                })),
        )
        .expect(1)
        .mount(&servers.gemini)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", format!("Bearer {GROQ_KEY}").as_str()))
        .respond_with(chat_reply("Day 1: Alfama"))
        .expect(1)
        .mount(&servers.groq)
        .await;

    let config = servers.config(vec![ProviderId::Gemini, ProviderId::Groq]);
    let (pipeline, sink) = pipeline(&config);
    let routed = pipeline.handle(&RoutingRequest::new("Two days in Lisbon")).await;

    let response = routed.result.as_ref().unwrap();
    assert_eq!(response.provider, ProviderId::Groq);
    assert_eq!(response.text, "Day 1: Alfama");
    assert_eq!(response.usage.total_tokens, 30);
    assert_eq!(sink.records()[0].fallback_chain, vec!["quota@gemini"]);

    // Single key spent: Gemini stays out until its window resets
    assert!(!pipeline.registry().is_available(ProviderId::Gemini));
}

#[tokio::test]
async fn test_unauthorized_key_is_auth_failure() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Invalid API Key"}})),
        )
        .mount(&servers.groq)
        .await;

    let mut config = servers.config(vec![ProviderId::Groq]);
    config.providers.get_mut(ProviderId::Gemini).enabled = false;
    let (pipeline, _sink) = pipeline(&config);
    let routed = pipeline.handle(&RoutingRequest::new("hi")).await;

    let err = routed.result.unwrap_err();
    assert!(matches!(err, GatewayError::AllProvidersExhausted { .. }));
    assert_eq!(err.failures()[0].kind, ErrorKind::Auth);
    assert!(!err.public_message().contains(GROQ_KEY));
}

#[tokio::test]
async fn test_gemini_invalid_key_400_is_auth_failure() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT",
                "details": [{"reason": "API_KEY_INVALID"}]
            }
        })))
        .mount(&servers.gemini)
        .await;

    let mut config = servers.config(vec![ProviderId::Gemini]);
    config.providers.get_mut(ProviderId::Groq).enabled = false;
    let (pipeline, _sink) = pipeline(&config);
    let routed = pipeline.handle(&RoutingRequest::new("hi")).await;

    assert_eq!(routed.decision.failures()[0].kind, ErrorKind::Auth);
}

#[tokio::test]
async fn test_prose_reply_to_json_request_falls_back() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply("Sure! Here is your itinerary: visit the castle."))
        .mount(&servers.groq)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(gemini_reply(r#"{"days": [{"city": "Lisbon"}]}"#))
        .mount(&servers.gemini)
        .await;

    let mut config = servers.config(vec![]);
    config.routing.medium = vec![ProviderId::Groq, ProviderId::Gemini];
    let (pipeline, _sink) = pipeline(&config);

    let request = RoutingRequest::new("Plan it").with_response_format(ResponseFormat::JsonObject);
    let routed = pipeline.handle(&request).await;

    assert_eq!(routed.decision.tier, ComplexityTier::Medium);
    assert_eq!(routed.decision.failures()[0].kind, ErrorKind::MalformedResponse);
    let response = routed.result.unwrap();
    assert_eq!(response.provider, ProviderId::Gemini);
    assert_eq!(response.structured.unwrap()["days"][0]["city"], "Lisbon");
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&servers.groq)
        .await;

    let mut config = servers.config(vec![ProviderId::Groq]);
    config.providers.get_mut(ProviderId::Gemini).enabled = false;
    let (pipeline, _sink) = pipeline(&config);
    let routed = pipeline.handle(&RoutingRequest::new("hi")).await;

    assert_eq!(routed.decision.failures()[0].kind, ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_probes_hit_model_listing() {
    let servers = Servers::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(query_param("pageSize", "1"))
        .and(header("x-goog-api-key", GEMINI_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .expect(1)
        .mount(&servers.gemini)
        .await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(1)
        .mount(&servers.groq)
        .await;

    let config = servers.config(vec![ProviderId::Groq, ProviderId::Gemini]);
    let registry = build_registry(&config).unwrap();
    let snapshot = registry.run_health_check().await;

    let available: Vec<ProviderId> = snapshot
        .iter()
        .filter(|h| h.is_available)
        .map(|h| h.provider)
        .collect();
    assert_eq!(available, vec![ProviderId::Gemini]);
    assert_eq!(registry.get_candidates(ComplexityTier::Low), vec![ProviderId::Gemini]);
}

#[tokio::test]
async fn test_cold_start_probe_runs_before_first_request() {
    let servers = Servers::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&servers.groq)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply("ok"))
        .expect(2)
        .mount(&servers.groq)
        .await;

    let mut config = servers.config(vec![ProviderId::Groq]);
    config.health.probe_on_cold_start = true;
    config.providers.get_mut(ProviderId::Gemini).enabled = false;
    let (pipeline, _sink) = pipeline(&config);

    assert!(pipeline.handle(&RoutingRequest::new("hi")).await.is_success());
    assert!(pipeline.handle(&RoutingRequest::new("again")).await.is_success());
}
