//! Scripted in-process adapter for tests and dry runs.
//!
//! Each call to [`LLMProvider::generate`] pops the next queued [`Step`];
//! once the queue is empty the default step repeats. Delays use tokio time,
//! so tests can run against a paused clock.

use async_trait::async_trait;
use gateway_core::{
    CompletionRequest, CompletionResponse, ErrorKind, LLMProvider, ProviderError, ProviderId,
    ResponseFormat, Usage,
};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reaction
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Answer after `delay`. Without text, a reply fitting the requested
    /// format is synthesized.
    Succeed {
        /// Reply text
        text: Option<String>,
        /// Reported usage
        usage: Usage,
        /// Simulated latency
        delay: Duration,
    },
    /// Fail after `delay`
    Fail {
        /// Classified kind
        kind: ErrorKind,
        /// Simulated latency
        delay: Duration,
        /// Backoff hint attached to the error
        retry_after: Option<Duration>,
    },
    /// Stall for the duration, then fail as a transient error
    Hang(Duration),
}

impl Step {
    /// Immediate success with a synthesized reply
    #[must_use]
    pub fn succeed() -> Self {
        Self::Succeed {
            text: None,
            usage: Usage::new(10, 20),
            delay: Duration::ZERO,
        }
    }

    /// Immediate success with the given text
    #[must_use]
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Succeed {
            text: Some(text.into()),
            usage: Usage::new(10, 20),
            delay: Duration::ZERO,
        }
    }

    /// Immediate failure
    #[must_use]
    pub fn fail(kind: ErrorKind) -> Self {
        Self::Fail {
            kind,
            delay: Duration::ZERO,
            retry_after: None,
        }
    }

    /// Quota failure carrying a backoff hint
    #[must_use]
    pub fn quota_retry_after(retry_after: Duration) -> Self {
        Self::Fail {
            kind: ErrorKind::Quota,
            delay: Duration::ZERO,
            retry_after: Some(retry_after),
        }
    }

    /// Stall, then fail
    #[must_use]
    pub fn hang(duration: Duration) -> Self {
        Self::Hang(duration)
    }

    /// Add latency to a success or failure step
    #[must_use]
    pub fn after(self, latency: Duration) -> Self {
        match self {
            Self::Succeed { text, usage, .. } => Self::Succeed {
                text,
                usage,
                delay: latency,
            },
            Self::Fail {
                kind, retry_after, ..
            } => Self::Fail {
                kind,
                delay: latency,
                retry_after,
            },
            Self::Hang(_) => Self::Hang(latency),
        }
    }
}

/// Adapter that replays a script
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    model: String,
    steps: Mutex<VecDeque<Step>>,
    default_step: Step,
    probe_result: Mutex<Result<(), ErrorKind>>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    keys_seen: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Adapter that always succeeds
    #[must_use]
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            model: format!("{id}-scripted"),
            steps: Mutex::new(VecDeque::new()),
            default_step: Step::succeed(),
            probe_result: Mutex::new(Ok(())),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            keys_seen: Mutex::new(Vec::new()),
        }
    }

    /// Queue a step
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Step used once the queue is drained
    #[must_use]
    pub fn with_default(mut self, step: Step) -> Self {
        self.default_step = step;
        self
    }

    /// Probe result
    #[must_use]
    pub fn with_probe(self, result: Result<(), ErrorKind>) -> Self {
        self.set_probe(result);
        self
    }

    /// Change the probe result on a shared adapter
    pub fn set_probe(&self, result: Result<(), ErrorKind>) {
        *self.probe_result.lock() = result;
    }

    /// Queue a step on a shared adapter
    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    /// Completed and in-flight `generate` calls
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Probe calls
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Keys presented to `generate`, in call order
    #[must_use]
    pub fn keys_seen(&self) -> Vec<String> {
        self.keys_seen.lock().clone()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_step.clone())
    }

    fn synthesize(&self, format: &ResponseFormat) -> String {
        match format {
            ResponseFormat::Text => format!("Scripted reply from {}", self.id),
            ResponseFormat::JsonObject => format!(r#"{{"provider":"{}"}}"#, self.id),
            ResponseFormat::JsonSchema { schema, .. } => {
                let mut object = Map::new();
                object.insert("provider".to_string(), Value::from(self.id.as_str()));
                let required = schema.get("required").and_then(Value::as_array);
                for key in required.into_iter().flatten().filter_map(Value::as_str) {
                    object.entry(key.to_string()).or_insert(Value::Null);
                }
                Value::Object(object).to_string()
            }
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        api_key: &SecretString,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys_seen.lock().push(api_key.expose_secret().clone());
        let started = tokio::time::Instant::now();

        match self.next_step() {
            Step::Succeed { text, usage, delay } => {
                tokio::time::sleep(delay).await;
                let text = text.unwrap_or_else(|| self.synthesize(&request.response_format));
                let structured = request
                    .response_format
                    .validate(&text)
                    .map_err(|violation| ProviderError::malformed(self.id, violation))?;
                Ok(CompletionResponse::new(self.id, &self.model, text)
                    .with_usage(usage)
                    .with_structured(structured)
                    .with_latency(started.elapsed()))
            }
            Step::Fail {
                kind,
                delay,
                retry_after,
            } => {
                tokio::time::sleep(delay).await;
                Err(ProviderError::new(self.id, kind, format!("scripted {kind} failure"))
                    .with_retry_after(retry_after))
            }
            Step::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Err(ProviderError::transient(self.id, "scripted stall ended"))
            }
        }
    }

    async fn probe(&self, _api_key: &SecretString) -> Result<(), ProviderError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let result = *self.probe_result.lock();
        result.map_err(|kind| ProviderError::new(self.id, kind, "scripted probe failure"))
    }
}
