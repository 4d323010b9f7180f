//! Every routed request produces exactly one complete record

use crate::helpers::*;
use gateway_core::{ErrorKind, ProviderId, RoutingRequest, RoutingState};
use gateway_providers::mock::{ScriptedProvider, Step};
use gateway_routing::RoutingPipeline;
use gateway_telemetry::{ChannelSink, MemorySink, MetricsSink, ObservabilityRecorder};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_one_record_per_request_for_every_outcome() {
    let harness = Harness::builder()
        .provider(
            ScriptedProvider::new(ProviderId::Groq)
                .then(Step::succeed())
                .then(Step::fail(ErrorKind::Transient))
                .then(Step::fail(ErrorKind::Transient)),
        )
        .provider(
            ScriptedProvider::new(ProviderId::Gemini)
                .then(Step::succeed())
                .then(Step::fail(ErrorKind::Quota)),
        )
        .build();

    let served = harness.pipeline.handle(&RoutingRequest::new("one")).await;
    let fell_back = harness.pipeline.handle(&RoutingRequest::new("two")).await;
    let exhausted = harness.pipeline.handle(&RoutingRequest::new("three")).await;

    assert!(served.is_success());
    assert_eq!(fell_back.decision.provider_used, Some(ProviderId::Gemini));
    assert_eq!(exhausted.decision.state, RoutingState::Exhausted);

    let records = harness.sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(harness.pipeline.recorder().recorded(), 3);

    for (record, routed) in records.iter().zip([&served, &fell_back, &exhausted]) {
        assert_eq!(record.request_id, routed.decision.request_id.as_str());
        assert_eq!(record.candidates, routed.decision.candidates);
        assert_eq!(record.outcomes.len(), routed.decision.attempts.len());
        assert_eq!(record.state, routed.decision.state);
    }

    assert_eq!(records[1].fallback_chain, vec!["transient@groq"]);
    assert_eq!(records[2].fallback_chain, vec!["transient@groq", "quota@gemini"]);
    assert_eq!(records[2].error_code.as_deref(), Some("all_providers_exhausted"));
    assert!(records[0].cost_usd > 0.0);
    assert_eq!(records[0].usage.total_tokens, 30);
}

#[tokio::test(start_paused = true)]
async fn test_record_serializes_without_secrets() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Cerebras))
        .build();
    harness.pipeline.handle(&RoutingRequest::new("hi")).await;

    let json = serde_json::to_value(&harness.sink.records()[0]).unwrap();
    assert_eq!(json["provider_used"], "cerebras");
    assert_eq!(json["outcomes"][0]["key_role"], "primary");
    assert!(!json.to_string().contains("cerebras-primary"));
}

#[tokio::test(start_paused = true)]
async fn test_full_sink_drops_without_failing_request() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq))
        .build();

    let memory = Arc::new(MemorySink::new());
    let (channel, mut receiver) = ChannelSink::new(1);
    let recorder = ObservabilityRecorder::default()
        .with_sink(Arc::new(channel))
        .with_sink(memory.clone());
    let pipeline = RoutingPipeline::new(Arc::clone(&harness.registry), Arc::new(recorder));

    assert!(pipeline.handle(&RoutingRequest::new("a")).await.is_success());
    assert!(pipeline.handle(&RoutingRequest::new("b")).await.is_success());

    assert_eq!(memory.len(), 2);
    assert_eq!(pipeline.recorder().recorded(), 2);
    assert_eq!(pipeline.recorder().dropped_records(), 1);
    assert!(receiver.try_recv().is_ok());
    assert!(receiver.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_track_attempts_and_fallbacks() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::new(ProviderId::Groq).then(Step::fail(ErrorKind::Transient)))
        .provider(
            ScriptedProvider::new(ProviderId::Gemini)
                .then(Step::succeed().after(Duration::from_millis(250))),
        )
        .build();

    let metrics = Arc::new(MetricsSink::new().unwrap());
    let recorder = ObservabilityRecorder::default().with_sink(metrics.clone());
    let pipeline = RoutingPipeline::new(Arc::clone(&harness.registry), Arc::new(recorder));
    pipeline.handle(&RoutingRequest::new("hi")).await;

    let text = metrics.gather().unwrap();
    assert!(has_sample(&text, "router_requests_total", &[r#"outcome="success""#, r#"tier="low""#], "1"));
    assert!(has_sample(&text, "router_attempts_total", &[r#"provider="groq""#, r#"status="failed""#], "1"));
    assert!(has_sample(&text, "router_attempts_total", &[r#"provider="gemini""#, r#"status="succeeded""#], "1"));
    assert!(has_sample(&text, "router_fallbacks_total", &[], "1"));
}

fn has_sample(text: &str, name: &str, labels: &[&str], value: &str) -> bool {
    text.lines()
        .filter(|line| line.starts_with(name) && !line.starts_with('#'))
        .any(|line| labels.iter().all(|l| line.contains(l)) && line.ends_with(&format!(" {value}")))
}
