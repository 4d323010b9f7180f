//! Request-scoped routing trace.
//!
//! A [`RoutingDecision`] is created when a request is classified, filled in by
//! the engine and executor, and handed to the recorder once terminal.

use crate::error::{AttemptFailure, ErrorKind};
use crate::response::{duration_ms, Usage};
use crate::types::{ComplexityTier, KeyRole, ProviderId, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of one routed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    /// Tier assigned
    Classified,
    /// Candidate list built from registry state
    CandidatesBuilt,
    /// At least one attempt issued
    Attempting,
    /// One provider served the request
    Succeeded,
    /// Every candidate failed
    Exhausted,
    /// Overall time budget ran out
    DeadlineExceeded,
    /// No candidate passed the availability filter
    NoProviderAvailable,
}

impl RoutingState {
    /// Whether no further transitions are allowed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::DeadlineExceeded | Self::NoProviderAvailable
        )
    }

    /// Snake-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::CandidatesBuilt => "candidates_built",
            Self::Attempting => "attempting",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NoProviderAvailable => "no_provider_available",
        }
    }
}

impl fmt::Display for RoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one attempt in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Served the request
    Succeeded,
    /// Failed with a classified kind
    Failed(ErrorKind),
    /// Hedged attempt whose result was discarded because another won
    Superseded,
}

/// One attempt in the fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Provider attempted
    pub provider: ProviderId,
    /// Key slot used; `None` when no slot could be leased
    pub key_role: Option<KeyRole>,
    /// Outcome
    pub status: AttemptStatus,
    /// Time spent on the attempt
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    /// Tokens consumed (successful attempts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Issued as a hedge against a slower candidate
    #[serde(default)]
    pub hedged: bool,
    /// Internal failure detail, never shown to end users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AttemptRecord {
    /// Successful attempt
    #[must_use]
    pub fn succeeded(
        provider: ProviderId,
        key_role: Option<KeyRole>,
        latency: Duration,
        usage: Usage,
    ) -> Self {
        Self {
            provider,
            key_role,
            status: AttemptStatus::Succeeded,
            latency,
            usage: Some(usage),
            hedged: false,
            detail: None,
        }
    }

    /// Failed attempt
    #[must_use]
    pub fn failed(
        provider: ProviderId,
        key_role: Option<KeyRole>,
        kind: ErrorKind,
        latency: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            key_role,
            status: AttemptStatus::Failed(kind),
            latency,
            usage: None,
            hedged: false,
            detail: Some(detail.into()),
        }
    }

    /// Hedged attempt abandoned in favour of the winner
    #[must_use]
    pub fn superseded(provider: ProviderId, key_role: Option<KeyRole>, latency: Duration) -> Self {
        Self {
            provider,
            key_role,
            status: AttemptStatus::Superseded,
            latency,
            usage: None,
            hedged: true,
            detail: None,
        }
    }

    /// Mark as issued by the hedging path
    #[must_use]
    pub fn hedged(mut self) -> Self {
        self.hedged = true;
        self
    }

    /// Failure entry for the exhaustion report, if this attempt failed
    #[must_use]
    pub fn failure(&self) -> Option<AttemptFailure> {
        match self.status {
            AttemptStatus::Failed(kind) => Some(AttemptFailure {
                provider: self.provider,
                kind,
                detail: self.detail.clone().unwrap_or_default(),
            }),
            AttemptStatus::Succeeded | AttemptStatus::Superseded => None,
        }
    }
}

/// Full trace of one routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Caller correlation ID
    pub request_id: RequestId,
    /// Assigned complexity tier
    pub tier: ComplexityTier,
    /// Ordered candidates built from registry state
    pub candidates: Vec<ProviderId>,
    /// Attempts in issue order
    pub attempts: Vec<AttemptRecord>,
    /// Provider that served the request
    pub provider_used: Option<ProviderId>,
    /// Current lifecycle state
    pub state: RoutingState,
    /// Wall-clock time from classification to terminal state
    #[serde(rename = "total_latency_ms", with = "duration_ms")]
    pub total_latency: Duration,
    /// Tokens consumed by the served response
    pub usage: Usage,
    /// When the request entered the router
    pub started_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// New decision in the `Classified` state
    #[must_use]
    pub fn new(request_id: RequestId, tier: ComplexityTier) -> Self {
        Self {
            request_id,
            tier,
            candidates: Vec::new(),
            attempts: Vec::new(),
            provider_used: None,
            state: RoutingState::Classified,
            total_latency: Duration::ZERO,
            usage: Usage::default(),
            started_at: Utc::now(),
        }
    }

    /// Populate the candidate list. An empty list is terminal.
    pub fn set_candidates(&mut self, candidates: Vec<ProviderId>) {
        self.state = if candidates.is_empty() {
            RoutingState::NoProviderAvailable
        } else {
            RoutingState::CandidatesBuilt
        };
        self.candidates = candidates;
    }

    /// Append an attempt record
    pub fn push_attempt(&mut self, attempt: AttemptRecord) {
        if self.state == RoutingState::CandidatesBuilt {
            self.state = RoutingState::Attempting;
        }
        self.attempts.push(attempt);
    }

    /// Mark the request served by `provider`
    pub fn succeed(&mut self, provider: ProviderId, usage: Usage) {
        self.provider_used = Some(provider);
        self.usage = usage;
        self.state = RoutingState::Succeeded;
    }

    /// Move to a terminal failure state
    pub fn fail(&mut self, state: RoutingState) {
        self.provider_used = None;
        self.state = state;
    }

    /// Providers attempted, in order (the fallback chain traversed)
    #[must_use]
    pub fn fallback_chain(&self) -> Vec<ProviderId> {
        self.attempts.iter().map(|a| a.provider).collect()
    }

    /// Failure reasons, one per failed attempt in attempt order
    #[must_use]
    pub fn failures(&self) -> Vec<AttemptFailure> {
        self.attempts.iter().filter_map(AttemptRecord::failure).collect()
    }

    /// Number of successful attempts (never more than one)
    #[must_use]
    pub fn successes(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Succeeded)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_candidates_is_terminal() {
        let mut decision = RoutingDecision::new(RequestId::new("r1"), ComplexityTier::Low);
        assert_eq!(decision.state, RoutingState::Classified);

        decision.set_candidates(vec![]);
        assert_eq!(decision.state, RoutingState::NoProviderAvailable);
        assert!(decision.state.is_terminal());
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut decision = RoutingDecision::new(RequestId::new("r2"), ComplexityTier::High);
        decision.set_candidates(vec![ProviderId::Groq, ProviderId::Cerebras]);
        assert_eq!(decision.state, RoutingState::CandidatesBuilt);

        decision.push_attempt(AttemptRecord::failed(
            ProviderId::Groq,
            Some(KeyRole::Primary),
            ErrorKind::Quota,
            Duration::from_millis(80),
            "429",
        ));
        assert_eq!(decision.state, RoutingState::Attempting);

        decision.push_attempt(AttemptRecord::succeeded(
            ProviderId::Cerebras,
            Some(KeyRole::Primary),
            Duration::from_millis(900),
            Usage::new(1000, 400),
        ));
        decision.succeed(ProviderId::Cerebras, Usage::new(1000, 400));

        assert_eq!(decision.provider_used, Some(ProviderId::Cerebras));
        assert_eq!(
            decision.fallback_chain(),
            vec![ProviderId::Groq, ProviderId::Cerebras]
        );
        assert_eq!(decision.failures().len(), 1);
        assert_eq!(decision.failures()[0].kind, ErrorKind::Quota);
        assert_eq!(decision.successes(), 1);
    }

    #[test]
    fn test_superseded_is_not_a_failure() {
        let record = AttemptRecord::superseded(ProviderId::Gemini, None, Duration::from_secs(1));
        assert!(record.failure().is_none());
        assert!(record.hedged);
    }

    #[test]
    fn test_attempt_record_serialization() {
        let record = AttemptRecord::failed(
            ProviderId::Gemini,
            Some(KeyRole::Secondary),
            ErrorKind::Transient,
            Duration::from_millis(2000),
            "timeout",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"]["failed"], "transient");
        assert_eq!(json["latency_ms"], 2000);
        assert_eq!(json["key_role"], "secondary");
    }
}
