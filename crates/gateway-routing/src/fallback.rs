//! Fallback execution over an ordered candidate list.
//!
//! Candidates are tried in order until one succeeds. Each attempt runs as its
//! own task under a timeout derived from the remaining deadline, and its
//! outcome reaches the registry exactly once: from the task when the adapter
//! returns, or from the executor when the attempt is abandoned.
//!
//! With `hedge_after` set, a primary still running after the lead time is
//! raced against the next candidate. The first success wins; the other
//! attempt is left to finish in the background and marked superseded.

use futures::future::{self, Either};
use gateway_config::ExecutionConfig;
use gateway_core::{
    AttemptRecord, CompletionRequest, CompletionResponse, ErrorKind, GatewayError, GatewayResult,
    KeyRole, ProviderError, ProviderId, ProviderOutcome, RoutingDecision, RoutingState,
};
use gateway_providers::ProviderRegistry;
use gateway_resilience::AttemptBudget;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Records an attempt's outcome at most once, whoever gets there first
struct OutcomeGuard {
    registry: Arc<ProviderRegistry>,
    provider: ProviderId,
    key_role: Option<KeyRole>,
    recorded: AtomicBool,
}

impl OutcomeGuard {
    fn new(registry: Arc<ProviderRegistry>, provider: ProviderId, key_role: Option<KeyRole>) -> Self {
        Self {
            registry,
            provider,
            key_role,
            recorded: AtomicBool::new(false),
        }
    }

    /// Record `outcome` unless another path already did. Returns whether
    /// this call wrote it.
    fn record(&self, outcome: &ProviderOutcome) -> bool {
        if self.recorded.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry
            .record_outcome(self.provider, self.key_role, outcome);
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptMeta {
    provider: ProviderId,
    key_role: Option<KeyRole>,
    hedged: bool,
    started: Instant,
}

impl AttemptMeta {
    fn failed(&self, kind: ErrorKind, detail: impl Into<String>) -> AttemptRecord {
        let record = AttemptRecord::failed(
            self.provider,
            self.key_role,
            kind,
            self.started.elapsed(),
            detail,
        );
        if self.hedged {
            record.hedged()
        } else {
            record
        }
    }

    fn succeeded(&self, response: &CompletionResponse) -> AttemptRecord {
        let record = AttemptRecord::succeeded(
            self.provider,
            self.key_role,
            self.started.elapsed(),
            response.usage,
        );
        if self.hedged {
            record.hedged()
        } else {
            record
        }
    }

    fn superseded(&self) -> AttemptRecord {
        AttemptRecord::superseded(self.provider, self.key_role, self.started.elapsed())
    }
}

struct InFlight {
    meta: AttemptMeta,
    handle: JoinHandle<Result<CompletionResponse, ProviderError>>,
    guard: Arc<OutcomeGuard>,
}

enum Settled {
    Served(Box<CompletionResponse>, AttemptRecord),
    Failed(AttemptRecord),
}

/// Drives one request through its candidate list
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    registry: Arc<ProviderRegistry>,
    config: ExecutionConfig,
}

impl FallbackExecutor {
    /// Create an executor over a shared registry
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: ExecutionConfig) -> Self {
        Self { registry, config }
    }

    /// Execution settings
    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Try the decision's candidates in order within `deadline`.
    ///
    /// Every attempt is appended to `decision`, which is left in a terminal
    /// state with its total latency set.
    ///
    /// # Errors
    /// - [`GatewayError::NoAvailableProvider`] when the decision has no candidates
    /// - [`GatewayError::DeadlineExceeded`] when the deadline ran out mid-chain
    /// - [`GatewayError::AllProvidersExhausted`] when every candidate failed
    #[instrument(
        skip_all,
        fields(request_id = %decision.request_id, tier = %decision.tier, deadline_ms = deadline.as_millis() as u64)
    )]
    pub async fn execute(
        &self,
        decision: &mut RoutingDecision,
        request: &CompletionRequest,
        deadline: Duration,
    ) -> GatewayResult<CompletionResponse> {
        let started = Instant::now();
        if decision.candidates.is_empty() {
            decision.fail(RoutingState::NoProviderAvailable);
            return Err(GatewayError::NoAvailableProvider {
                tier: decision.tier,
            });
        }

        let budget = AttemptBudget::start(deadline, self.config.min_attempt_timeout);
        let request = Arc::new(request.clone());
        let result = self.run_chain(decision, &request, &budget).await;
        decision.total_latency = started.elapsed();

        match &result {
            Ok(response) => {
                decision.succeed(response.provider, response.usage);
                info!(
                    provider = %response.provider,
                    attempts = decision.attempts.len(),
                    latency_ms = decision.total_latency.as_millis() as u64,
                    "Request served"
                );
            }
            Err(GatewayError::DeadlineExceeded { .. }) => {
                decision.fail(RoutingState::DeadlineExceeded);
                warn!(attempts = decision.attempts.len(), "Deadline exceeded");
            }
            Err(_) => {
                decision.fail(RoutingState::Exhausted);
                warn!(attempts = decision.attempts.len(), "All providers exhausted");
            }
        }
        result
    }

    async fn run_chain(
        &self,
        decision: &mut RoutingDecision,
        request: &Arc<CompletionRequest>,
        budget: &AttemptBudget,
    ) -> GatewayResult<CompletionResponse> {
        let candidates = decision.candidates.clone();
        let mut next = 0;

        while next < candidates.len() {
            if budget.is_expired() {
                return Err(GatewayError::DeadlineExceeded {
                    deadline: budget.total(),
                    failures: decision.failures(),
                });
            }

            let remaining = candidates.len() - next;
            let primary = match self.start_attempt(candidates[next], request, false) {
                Ok(attempt) => attempt,
                Err(record) => {
                    decision.push_attempt(record);
                    next += 1;
                    continue;
                }
            };
            let until = budget.attempt_deadline(remaining);
            debug!(
                provider = %primary.meta.provider,
                key_role = ?primary.meta.key_role,
                timeout_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Attempt started"
            );

            let hedge_with = self
                .config
                .hedge_after
                .and_then(|lead| candidates.get(next + 1).map(|&p| (lead, p)));

            let served = match hedge_with {
                Some((lead, secondary)) => {
                    let (served, consumed) = self
                        .hedged(decision, primary, until, lead, secondary, request, budget, remaining)
                        .await;
                    next += consumed;
                    served
                }
                None => {
                    next += 1;
                    Self::push(decision, Self::settle(primary, until).await)
                }
            };

            if let Some(response) = served {
                return Ok(*response);
            }
        }

        if budget.is_expired() {
            return Err(GatewayError::DeadlineExceeded {
                deadline: budget.total(),
                failures: decision.failures(),
            });
        }
        Err(GatewayError::AllProvidersExhausted {
            failures: decision.failures(),
        })
    }

    /// Lease a key and spawn the adapter call. Without a key the attempt
    /// fails as quota and is recorded immediately.
    fn start_attempt(
        &self,
        provider: ProviderId,
        request: &Arc<CompletionRequest>,
        hedged: bool,
    ) -> Result<InFlight, AttemptRecord> {
        let started = Instant::now();
        let lease = self.registry.acquire(provider);
        let adapter = self.registry.adapter(provider);

        let (Some(lease), Some(adapter)) = (lease, adapter) else {
            let outcome = ProviderOutcome::Failure {
                kind: ErrorKind::Quota,
                latency: Duration::ZERO,
                retry_after: None,
            };
            self.registry.record_outcome(provider, None, &outcome);
            let meta = AttemptMeta {
                provider,
                key_role: None,
                hedged,
                started,
            };
            warn!(provider = %provider, "No usable key slot");
            return Err(meta.failed(ErrorKind::Quota, "no key slot with remaining quota"));
        };

        let meta = AttemptMeta {
            provider,
            key_role: Some(lease.role),
            hedged,
            started,
        };
        let guard = Arc::new(OutcomeGuard::new(
            Arc::clone(&self.registry),
            provider,
            Some(lease.role),
        ));

        let task_guard = Arc::clone(&guard);
        let request = Arc::clone(request);
        let handle = tokio::spawn(async move {
            let result = adapter.generate(&request, &lease.key).await;
            let latency = started.elapsed();
            let outcome = match &result {
                Ok(response) => ProviderOutcome::Success {
                    latency,
                    usage: response.usage,
                },
                Err(error) => ProviderOutcome::from_error(error, latency),
            };
            task_guard.record(&outcome);
            result
        });

        Ok(InFlight {
            meta,
            handle,
            guard,
        })
    }

    /// Wait for an attempt until `until`, aborting it on timeout
    async fn settle(mut attempt: InFlight, until: Instant) -> Settled {
        let meta = attempt.meta;
        match timeout_at(until, &mut attempt.handle).await {
            Ok(joined) => Self::joined(&attempt, joined),
            Err(_) => {
                let timed_out = attempt.guard.record(&ProviderOutcome::Failure {
                    kind: ErrorKind::Transient,
                    latency: meta.started.elapsed(),
                    retry_after: None,
                });
                if !timed_out {
                    // The call finished as the timer fired; its outcome stands
                    debug!(provider = %meta.provider, "Attempt finished at its timeout");
                    let joined = (&mut attempt.handle).await;
                    return Self::joined(&attempt, joined);
                }
                attempt.handle.abort();
                warn!(provider = %meta.provider, "Attempt timed out");
                Settled::Failed(meta.failed(ErrorKind::Transient, "attempt timed out"))
            }
        }
    }

    fn joined(
        attempt: &InFlight,
        joined: Result<Result<CompletionResponse, ProviderError>, JoinError>,
    ) -> Settled {
        let meta = attempt.meta;
        match joined {
            Ok(Ok(response)) => {
                let record = meta.succeeded(&response);
                Settled::Served(Box::new(response), record)
            }
            Ok(Err(error)) => {
                warn!(
                    provider = %meta.provider,
                    kind = %error.kind,
                    status = ?error.status_code,
                    "Attempt failed"
                );
                Settled::Failed(meta.failed(error.kind, error.message))
            }
            Err(join_error) => {
                attempt.guard.record(&ProviderOutcome::Failure {
                    kind: ErrorKind::Transient,
                    latency: meta.started.elapsed(),
                    retry_after: None,
                });
                warn!(provider = %meta.provider, error = %join_error, "Attempt task failed");
                Settled::Failed(meta.failed(ErrorKind::Transient, "attempt task failed"))
            }
        }
    }

    /// Append a settled attempt, handing back the response if it won
    fn push(decision: &mut RoutingDecision, settled: Settled) -> Option<Box<CompletionResponse>> {
        match settled {
            Settled::Served(response, record) => {
                decision.push_attempt(record);
                Some(response)
            }
            Settled::Failed(record) => {
                decision.push_attempt(record);
                None
            }
        }
    }

    /// Run `primary`, racing `secondary` against it once `lead` has passed.
    /// Attempts are appended to `decision` in issue order. Returns the winning
    /// response, if any, and how many candidates were consumed.
    #[allow(clippy::too_many_arguments)]
    async fn hedged(
        &self,
        decision: &mut RoutingDecision,
        primary: InFlight,
        until: Instant,
        lead: Duration,
        secondary: ProviderId,
        request: &Arc<CompletionRequest>,
        budget: &AttemptBudget,
        remaining: usize,
    ) -> (Option<Box<CompletionResponse>>, usize) {
        let primary_meta = primary.meta;
        let mut primary_fut = pin!(Self::settle(primary, until));
        let lead_until = (Instant::now() + lead).min(until);

        if let Ok(settled) = timeout_at(lead_until, primary_fut.as_mut()).await {
            return (Self::push(decision, settled), 1);
        }

        let hedge = match self.start_attempt(secondary, request, true) {
            Ok(hedge) => hedge,
            Err(record) => {
                let served = Self::push(decision, primary_fut.await);
                decision.push_attempt(record);
                return (served, 2);
            }
        };
        info!(
            primary = %primary_meta.provider,
            hedge = %hedge.meta.provider,
            lead_ms = lead.as_millis() as u64,
            "Hedging slow attempt"
        );

        let hedge_meta = hedge.meta;
        let hedge_until = budget.attempt_deadline(remaining.saturating_sub(1));
        let hedge_fut = pin!(Self::settle(hedge, hedge_until));

        // The losing attempt is never aborted; its task records its own outcome
        let served = match future::select(primary_fut, hedge_fut).await {
            Either::Left((Settled::Failed(primary_record), hedge_fut)) => {
                decision.push_attempt(primary_record);
                Self::push(decision, hedge_fut.await)
            }
            Either::Left((won, _)) => {
                let served = Self::push(decision, won);
                decision.push_attempt(hedge_meta.superseded());
                served
            }
            Either::Right((Settled::Failed(hedge_record), primary_fut)) => {
                let served = Self::push(decision, primary_fut.await);
                decision.push_attempt(hedge_record);
                served
            }
            Either::Right((won, _)) => {
                decision.push_attempt(primary_meta.superseded());
                Self::push(decision, won)
            }
        };
        (served, 2)
    }
}
