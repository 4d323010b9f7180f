//! Shared health store behaviour across requests

use crate::helpers::*;
use gateway_core::{ErrorKind, KeyRole, ProviderId, RoutingRequest};
use gateway_providers::mock::{ScriptedProvider, Step};
use gateway_providers::{ProviderSettings, UnhealthyReason};
use std::time::Duration;

#[tokio::test]
async fn test_exhausted_provider_heals_after_quota_window() {
    let settings = ProviderSettings::new(keys_for(ProviderId::Groq, 1))
        .with_key_policy(tight_policy(10, Duration::from_millis(200)));
    let harness = Harness::builder()
        .provider_with(
            ScriptedProvider::new(ProviderId::Groq).then(Step::fail(ErrorKind::Quota)),
            settings,
        )
        .provider(ScriptedProvider::new(ProviderId::Gemini))
        .build();

    let routed = harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    assert_eq!(routed.decision.provider_used, Some(ProviderId::Gemini));
    assert!(!harness.registry.is_available(ProviderId::Groq));

    let health = harness.registry.health(ProviderId::Groq).unwrap();
    assert!(!health.has_capacity);
    assert_eq!(health.active_key, None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = harness.registry.run_health_check().await;
    let groq = snapshot.iter().find(|h| h.provider == ProviderId::Groq).unwrap();
    assert!(groq.is_available);
    assert_eq!(groq.active_key, Some(KeyRole::Primary));

    let routed = harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    assert_eq!(routed.decision.provider_used, Some(ProviderId::Groq));
}

#[tokio::test]
async fn test_failed_probe_marks_unhealthy_until_next_success() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq).with_probe(Err(ErrorKind::Transient)))
        .provider(ScriptedProvider::new(ProviderId::Gemini))
        .build();

    harness.registry.run_health_check().await;
    let groq = harness.registry.health(ProviderId::Groq).unwrap();
    assert!(!groq.is_healthy);
    assert!(!groq.is_available);
    assert!(groq.unhealthy_reason.is_some());
    assert_eq!(
        harness.registry.get_candidates(gateway_core::ComplexityTier::Low),
        vec![ProviderId::Gemini]
    );

    harness.scripted(ProviderId::Groq).set_probe(Ok(()));
    harness.registry.run_health_check().await;
    assert!(harness.registry.is_available(ProviderId::Groq));
    assert_eq!(harness.scripted(ProviderId::Groq).probe_count(), 2);
}

#[tokio::test]
async fn test_rejected_key_rotates_without_dropping_provider() {
    let settings = ProviderSettings::new(keys_for(ProviderId::Gemini, 3));
    let harness = Harness::builder()
        .provider_with(
            ScriptedProvider::new(ProviderId::Gemini).then(Step::fail(ErrorKind::Auth)),
            settings,
        )
        .build();

    let first = harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    assert!(!first.is_success());
    assert_eq!(first.decision.failures()[0].kind, ErrorKind::Auth);

    let health = harness.registry.health(ProviderId::Gemini).unwrap();
    assert!(health.is_available);
    assert_eq!(health.active_key, Some(KeyRole::Secondary));

    let second = harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    assert!(second.is_success());
    assert_eq!(
        harness.scripted(ProviderId::Gemini).keys_seen(),
        vec!["gemini-primary", "gemini-secondary"]
    );
}

#[tokio::test]
async fn test_disabled_provider_reports_reason() {
    let harness = Harness::builder()
        .disabled(ScriptedProvider::new(ProviderId::Cerebras))
        .provider(ScriptedProvider::new(ProviderId::Groq))
        .build();

    let snapshot = harness.registry.snapshot();
    let cerebras = snapshot
        .iter()
        .find(|h| h.provider == ProviderId::Cerebras)
        .unwrap();
    assert!(!cerebras.is_enabled);
    assert!(!cerebras.is_available);
    assert_eq!(cerebras.unhealthy_reason, Some(UnhealthyReason::Disabled));

    harness.registry.run_health_check().await;
    assert_eq!(harness.scripted(ProviderId::Cerebras).probe_count(), 0);
}

#[tokio::test]
async fn test_usage_accumulates_per_provider() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq))
        .build();

    for _ in 0..3 {
        harness.pipeline.handle(&RoutingRequest::new("hi")).await;
    }

    let groq = harness.registry.health(ProviderId::Groq).unwrap();
    assert_eq!(groq.metrics.total_requests, 3);
    assert_eq!(groq.metrics.successful_requests, 3);
    assert_eq!(groq.metrics.tokens_used, 90);
    assert_eq!(harness.registry.total_usage().total_tokens, 90);
}
