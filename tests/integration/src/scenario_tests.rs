//! End-to-end routing scenarios over scripted providers

use crate::helpers::*;
use gateway_core::{
    ComplexityTier, ErrorKind, GatewayError, ProviderId, ResponseFormat, RoutingRequest,
    RoutingState,
};
use gateway_providers::mock::{ScriptedProvider, Step};
use gateway_providers::ProviderSettings;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;

fn all_providers() -> HarnessBuilder {
    Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq))
        .provider(ScriptedProvider::new(ProviderId::Gemini))
        .provider(ScriptedProvider::new(ProviderId::Cerebras))
}

#[tokio::test(start_paused = true)]
async fn test_short_prompt_served_by_first_low_candidate() {
    let harness = all_providers().build();
    let routed = harness.pipeline.handle(&RoutingRequest::new("x".repeat(50))).await;

    assert!(routed.is_success());
    assert_eq!(routed.decision.tier, ComplexityTier::Low);
    assert_eq!(
        routed.decision.candidates,
        vec![ProviderId::Groq, ProviderId::Gemini, ProviderId::Cerebras]
    );
    assert_eq!(routed.decision.provider_used, Some(ProviderId::Groq));
    assert_eq!(routed.decision.fallback_chain(), vec![ProviderId::Groq]);
    assert_eq!(harness.scripted(ProviderId::Gemini).call_count(), 0);
    assert_eq!(harness.scripted(ProviderId::Cerebras).call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_structured_long_prompt_falls_back_to_third_candidate() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq).then(Step::fail(ErrorKind::Quota)))
        .provider(ScriptedProvider::new(ProviderId::Gemini).then(Step::hang(Duration::from_secs(60))))
        .provider(ScriptedProvider::new(ProviderId::Cerebras))
        .preferences(
            ComplexityTier::High,
            vec![ProviderId::Groq, ProviderId::Gemini, ProviderId::Cerebras],
        )
        .build();

    let request =
        RoutingRequest::new("y".repeat(4000)).with_response_format(ResponseFormat::JsonObject);
    let routed = harness.pipeline.handle(&request).await;

    assert_eq!(routed.decision.tier, ComplexityTier::High);
    let response = routed.result.as_ref().unwrap();
    assert_eq!(response.provider, ProviderId::Cerebras);
    assert!(response.structured.is_some());

    let reasons: Vec<String> = routed
        .decision
        .failures()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(reasons, vec!["quota@groq", "transient@gemini"]);
    assert_eq!(harness.sink.records()[0].fallback_chain, reasons);
}

#[tokio::test(start_paused = true)]
async fn test_all_disabled_never_calls_an_adapter() {
    let harness = Harness::builder()
        .disabled(ScriptedProvider::new(ProviderId::Groq))
        .disabled(ScriptedProvider::new(ProviderId::Gemini))
        .disabled(ScriptedProvider::new(ProviderId::Cerebras))
        .build();

    let routed = harness.pipeline.handle(&RoutingRequest::new("hello")).await;

    assert!(matches!(
        routed.result,
        Err(GatewayError::NoAvailableProvider { tier: ComplexityTier::Low })
    ));
    assert_eq!(routed.decision.state, RoutingState::NoProviderAvailable);
    assert_eq!(harness.total_calls(), 0);

    let records = harness.sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].candidates.is_empty());
    assert!(!records[0].is_success());
}

#[tokio::test]
async fn test_quota_hit_rotates_to_secondary_key() {
    let groq = (0..9)
        .fold(ScriptedProvider::new(ProviderId::Groq), |p, _| p.then(Step::succeed()))
        .then(Step::fail(ErrorKind::Quota));
    let settings = ProviderSettings::new(keys_for(ProviderId::Groq, 2))
        .with_key_policy(tight_policy(10, Duration::from_secs(3600)));
    let harness = Harness::builder()
        .provider_with(groq, settings)
        .provider(ScriptedProvider::new(ProviderId::Gemini))
        .build();

    for _ in 0..9 {
        let routed = harness.pipeline.handle(&RoutingRequest::new("short")).await;
        assert_eq!(routed.decision.provider_used, Some(ProviderId::Groq));
    }

    // Tenth request: the provider reports quota; the router falls back
    let tenth = harness.pipeline.handle(&RoutingRequest::new("short")).await;
    assert_eq!(tenth.decision.provider_used, Some(ProviderId::Gemini));
    assert_eq!(tenth.decision.failures()[0].kind, ErrorKind::Quota);

    let eleventh = harness.pipeline.handle(&RoutingRequest::new("short")).await;
    assert_eq!(eleventh.decision.provider_used, Some(ProviderId::Groq));
    assert_eq!(
        eleventh.decision.attempts[0].key_role,
        Some(gateway_core::KeyRole::Secondary)
    );

    let keys = harness.scripted(ProviderId::Groq).keys_seen();
    assert_eq!(keys.len(), 11);
    assert!(keys[..10].iter().all(|k| k == "groq-primary"));
    assert_eq!(keys[10], "groq-secondary");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_total_time() {
    let hang = || Step::hang(Duration::from_secs(2));
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq).with_default(hang()))
        .provider(ScriptedProvider::new(ProviderId::Gemini).with_default(hang()))
        .provider(ScriptedProvider::new(ProviderId::Cerebras).with_default(hang()))
        .deadline(Duration::from_millis(3000))
        .build();

    let started = Instant::now();
    let routed = harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    let elapsed = started.elapsed();

    assert!(matches!(routed.result, Err(GatewayError::DeadlineExceeded { .. })));
    assert_eq!(routed.decision.state, RoutingState::DeadlineExceeded);
    assert!(routed.decision.attempts.len() <= 2);
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(3100));
    assert_eq!(routed.result.unwrap_err().status_code().as_u16(), 504);
}

#[tokio::test(start_paused = true)]
async fn test_hedged_request_serves_faster_candidate() {
    let harness = Harness::builder()
        .provider(
            ScriptedProvider::new(ProviderId::Groq).then(Step::succeed().after(Duration::from_secs(5))),
        )
        .provider(
            ScriptedProvider::new(ProviderId::Gemini)
                .then(Step::succeed().after(Duration::from_millis(100))),
        )
        .hedge_after(Duration::from_millis(500))
        .build();

    let routed = harness.pipeline.handle(&RoutingRequest::new("hi")).await;

    assert_eq!(routed.decision.provider_used, Some(ProviderId::Gemini));
    assert_eq!(routed.decision.successes(), 1);
    assert_eq!(routed.decision.attempts.len(), 2);
    assert!(routed.decision.attempts[1].hedged);
}
