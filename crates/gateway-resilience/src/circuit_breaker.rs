//! Error-rate circuit breaker.
//!
//! Each provider gets one breaker. It watches a rolling window of recent
//! attempt outcomes and opens when the failure rate crosses a threshold,
//! which is what marks a provider unhealthy. After a cooldown it half-opens
//! and lets traffic through again; a success closes it, a failure reopens it.

use gateway_core::ProviderId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// Traffic flows normally
    Closed = 0,
    /// Provider considered unhealthy
    Open = 1,
    /// Cooldown elapsed, probing with live traffic
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0 - 1.0) at which the circuit opens
    pub error_rate_threshold: f64,
    /// Number of recent outcomes considered
    pub window_size: usize,
    /// Minimum outcomes in the window before the rate is trusted
    pub min_requests: usize,
    /// Time the circuit stays open before half-opening
    pub cooldown: Duration,
    /// Successes needed in half-open state to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            window_size: 20,
            min_requests: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// Circuit breaker for a single provider
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    /// Current state (atomic for lock-free reads)
    state: AtomicU8,
    /// Recent outcomes, `true` for failure, newest last
    window: Mutex<VecDeque<bool>>,
    half_open_successes: AtomicU32,
    /// Milliseconds since epoch when the circuit opened
    opened_at: AtomicU64,
    transition_lock: RwLock<()>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        let window = VecDeque::with_capacity(config.window_size);
        Self {
            provider,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window: Mutex::new(window),
            half_open_successes: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            transition_lock: RwLock::new(()),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(provider: ProviderId) -> Self {
        Self::new(provider, CircuitBreakerConfig::default())
    }

    /// Provider guarded by this breaker
    #[must_use]
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Current state without side effects
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether the provider should receive traffic.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here.
    pub fn is_healthy(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    self.transition_to_half_open();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        self.push_outcome(false);

        if self.state() == CircuitState::HalfOpen {
            let successes = self.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                provider = %self.provider,
                successes,
                threshold = self.config.success_threshold,
                "Circuit breaker half-open success"
            );
            if successes >= self.config.success_threshold {
                self.transition_to_closed();
            }
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let rate = self.push_outcome(true);

        match self.state() {
            CircuitState::Closed => {
                if let Some(rate) = rate {
                    if rate >= self.config.error_rate_threshold {
                        debug!(
                            provider = %self.provider,
                            error_rate = rate,
                            threshold = self.config.error_rate_threshold,
                            "Circuit breaker error rate threshold reached"
                        );
                        self.transition_to_open();
                    }
                }
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider, "Circuit breaker half-open failure, reopening");
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    /// Push an outcome and return the failure rate once the window is trusted
    fn push_outcome(&self, failed: bool) -> Option<f64> {
        let mut window = self.window.lock();
        if window.len() == self.config.window_size.max(1) {
            window.pop_front();
        }
        window.push_back(failed);

        if window.len() < self.config.min_requests.max(1) {
            return None;
        }
        let failures = window.iter().filter(|f| **f).count();
        Some(failures as f64 / window.len() as f64)
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == 0 {
            return false;
        }
        now_millis().saturating_sub(opened_at) >= self.config.cooldown.as_millis() as u64
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.write();

        let prev_state = self.state.swap(CircuitState::Open as u8, Ordering::Release);
        if prev_state != CircuitState::Open as u8 {
            self.opened_at.store(now_millis(), Ordering::Release);
            self.half_open_successes.store(0, Ordering::Relaxed);
            warn!(provider = %self.provider, "Circuit breaker opened, provider unhealthy");
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.write();

        let prev_state = self.state.swap(CircuitState::HalfOpen as u8, Ordering::Release);
        if prev_state == CircuitState::Open as u8 {
            self.half_open_successes.store(0, Ordering::Relaxed);
            info!(provider = %self.provider, "Circuit breaker half-open, admitting traffic");
        }
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.write();

        let prev_state = self.state.swap(CircuitState::Closed as u8, Ordering::Release);
        self.window.lock().clear();
        self.half_open_successes.store(0, Ordering::Relaxed);
        self.opened_at.store(0, Ordering::Release);

        if prev_state != CircuitState::Closed as u8 {
            info!(provider = %self.provider, "Circuit breaker closed");
        }
    }

    /// Reset to closed, e.g. after a successful health probe
    pub fn reset(&self) {
        self.transition_to_closed();
    }

    /// Force the circuit open, e.g. after a failed health probe
    pub fn force_open(&self) {
        self.transition_to_open();
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let window = self.window.lock();
        CircuitBreakerStats {
            state: self.state(),
            window_failures: window.iter().filter(|f| **f).count(),
            window_len: window.len(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failures in the rolling window
    pub window_failures: usize,
    /// Outcomes in the rolling window
    pub window_len: usize,
}

impl CircuitBreakerStats {
    /// Failure rate over the rolling window
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.window_len == 0 {
            0.0
        } else {
            self.window_failures as f64 / self.window_len as f64
        }
    }
}
