//! API key slots and rotation.
//!
//! Each provider owns up to three [`ApiKeySlot`]s. Exactly one slot is active
//! while any slot is eligible; when none is, the provider has no capacity
//! until a quota window or cooldown lapses.

use chrono::{DateTime, Utc};
use gateway_core::{ErrorKind, KeyRole, ProviderId, ProviderOutcome};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smoothing factor for rolling success rate and latency
const EWMA_ALPHA: f64 = 0.2;

/// Quota and failure policy applied to every slot of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Requests allowed per key per window
    pub quota_limit: u32,
    /// Length of a quota window
    pub quota_window: Duration,
    /// Consecutive failures before a key is rotated out
    pub failure_threshold: u32,
    /// How long a rotated-out key stays ineligible
    pub key_cooldown: Duration,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            quota_limit: 30,
            quota_window: Duration::from_secs(60),
            failure_threshold: 3,
            key_cooldown: Duration::from_secs(60),
        }
    }
}

/// Key handed to the executor for one attempt
#[derive(Debug, Clone)]
pub struct KeyLease {
    /// Slot the key came from
    pub role: KeyRole,
    /// Key material
    pub key: SecretString,
}

/// One configured API credential
#[derive(Debug)]
pub struct ApiKeySlot {
    role: KeyRole,
    key: SecretString,
    quota_used: u32,
    quota_limit: u32,
    window_start: DateTime<Utc>,
    quota_reset_at: DateTime<Utc>,
    success_rate: f64,
    avg_latency_ms: Option<f64>,
    consecutive_failures: u32,
    exhausted_until: Option<DateTime<Utc>>,
    suspended_until: Option<DateTime<Utc>>,
    is_active: bool,
}

impl ApiKeySlot {
    fn new(role: KeyRole, key: SecretString, policy: &KeyPolicy, now: DateTime<Utc>) -> Self {
        Self {
            role,
            key,
            quota_used: 0,
            quota_limit: policy.quota_limit,
            window_start: now,
            quota_reset_at: after(now, policy.quota_window),
            success_rate: 1.0,
            avg_latency_ms: None,
            consecutive_failures: 0,
            exhausted_until: None,
            suspended_until: None,
            is_active: false,
        }
    }

    /// Slot role
    #[must_use]
    pub fn role(&self) -> KeyRole {
        self.role
    }

    /// Whether this slot is the provider's active key
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Rolling success rate (1.0 until the first failure)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    /// Rolling average latency in milliseconds
    #[must_use]
    pub fn avg_latency_ms(&self) -> Option<f64> {
        self.avg_latency_ms
    }

    /// Requests counted in the current window
    #[must_use]
    pub fn quota_used(&self) -> u32 {
        self.quota_used
    }

    /// When the current quota window ends
    #[must_use]
    pub fn quota_reset_at(&self) -> DateTime<Utc> {
        self.quota_reset_at
    }

    /// Roll the quota window and clear lapsed exhaustion or suspension
    fn refresh(&mut self, policy: &KeyPolicy, now: DateTime<Utc>) {
        if now >= self.quota_reset_at {
            self.quota_used = 0;
            self.window_start = now;
            self.quota_reset_at = after(now, policy.quota_window);
        }
        if self.exhausted_until.is_some_and(|until| now >= until) {
            self.exhausted_until = None;
        }
        if self.suspended_until.is_some_and(|until| now >= until) {
            self.suspended_until = None;
            self.consecutive_failures = 0;
        }
    }

    /// Whether the slot may serve a request at `now`
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.quota_used < self.quota_limit
            && self.exhausted_until.map_or(true, |until| now >= until)
            && self.suspended_until.map_or(true, |until| now >= until)
    }

    fn observe(&mut self, success: bool, latency: Duration) {
        let sample = if success { 1.0 } else { 0.0 };
        self.success_rate = EWMA_ALPHA.mul_add(sample - self.success_rate, self.success_rate);

        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => EWMA_ALPHA.mul_add(latency_ms - avg, avg),
            None => latency_ms,
        });
    }

    fn record(&mut self, outcome: &ProviderOutcome, policy: &KeyPolicy, now: DateTime<Utc>) {
        match *outcome {
            ProviderOutcome::Success { latency, .. } => {
                self.observe(true, latency);
                self.quota_used = self.quota_used.saturating_add(1);
                self.consecutive_failures = 0;
            }
            ProviderOutcome::Failure {
                kind,
                latency,
                retry_after,
            } => {
                self.observe(false, latency);
                match kind {
                    ErrorKind::Quota => {
                        // Provider says the budget is spent; trust it over our counter
                        self.quota_used = self.quota_limit;
                        let hinted = retry_after.map(|d| after(now, d));
                        self.exhausted_until = Some(
                            hinted.map_or(self.quota_reset_at, |h| h.max(self.quota_reset_at)),
                        );
                    }
                    ErrorKind::Auth => {
                        self.suspended_until = Some(after(now, policy.key_cooldown));
                    }
                    ErrorKind::Transient | ErrorKind::MalformedResponse => {
                        self.quota_used = self.quota_used.saturating_add(1);
                        self.consecutive_failures += 1;
                        if self.consecutive_failures >= policy.failure_threshold {
                            self.suspended_until =
                                Some(after(now, policy.key_cooldown));
                        }
                    }
                }
            }
        }
    }
}

/// Serializable view of a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySlotSnapshot {
    /// Slot role
    pub role: KeyRole,
    /// Active flag
    pub is_active: bool,
    /// Eligible to serve right now
    pub eligible: bool,
    /// Requests counted in the current window
    pub quota_used: u32,
    /// Window limit
    pub quota_limit: u32,
    /// Start of the current window
    pub window_start: DateTime<Utc>,
    /// End of the current window
    pub quota_reset_at: DateTime<Utc>,
    /// Rolling success rate
    pub success_rate: f64,
    /// Rolling average latency
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
}

/// The slots of one provider plus the active pointer
#[derive(Debug)]
pub struct KeyRing {
    provider: ProviderId,
    policy: KeyPolicy,
    slots: Vec<ApiKeySlot>,
    active: Option<usize>,
}

impl KeyRing {
    /// Build slots from key material in role order (at most three are used)
    #[must_use]
    pub fn new(
        provider: ProviderId,
        keys: Vec<SecretString>,
        policy: KeyPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let slots: Vec<ApiKeySlot> = keys
            .into_iter()
            .enumerate()
            .filter_map(|(index, key)| {
                KeyRole::from_index(index).map(|role| ApiKeySlot::new(role, key, &policy, now))
            })
            .collect();

        let mut ring = Self {
            provider,
            policy,
            slots,
            active: None,
        };
        if !ring.slots.is_empty() {
            ring.activate(0);
        }
        ring
    }

    /// Number of configured slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no keys are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Active slot, if any
    #[must_use]
    pub fn active(&self) -> Option<&ApiKeySlot> {
        self.active.and_then(|index| self.slots.get(index))
    }

    /// Role of the active slot
    #[must_use]
    pub fn active_role(&self) -> Option<KeyRole> {
        self.active().map(ApiKeySlot::role)
    }

    /// All slots in role order
    #[must_use]
    pub fn slots(&self) -> &[ApiKeySlot] {
        &self.slots
    }

    /// Roll windows and lapsed penalties, then make sure an eligible slot is
    /// active if one exists
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        for slot in &mut self.slots {
            slot.refresh(&self.policy, now);
        }
        let active_ok = self
            .active()
            .is_some_and(|slot| slot.is_eligible(now));
        if !active_ok {
            self.rotate(now);
        }
    }

    /// Whether the provider can take a request at `now`
    #[must_use]
    pub fn has_capacity(&self, now: DateTime<Utc>) -> bool {
        self.active().is_some_and(|slot| slot.is_eligible(now))
    }

    /// Lease the active key
    pub fn lease(&mut self, now: DateTime<Utc>) -> Option<KeyLease> {
        self.refresh(now);
        let slot = self.active()?;
        slot.is_eligible(now).then(|| KeyLease {
            role: slot.role,
            key: slot.key.clone(),
        })
    }

    /// Apply an attempt outcome to the slot that served it and rotate if the
    /// active slot can no longer serve
    pub fn record(&mut self, role: KeyRole, outcome: &ProviderOutcome, now: DateTime<Utc>) {
        let policy = self.policy;
        let Some(slot) = self.slots.iter_mut().find(|s| s.role == role) else {
            debug!(provider = %self.provider, role = %role, "Outcome for unknown key slot ignored");
            return;
        };
        slot.record(outcome, &policy, now);

        let served_by_active = self.active_role() == Some(role);
        if served_by_active && !self.has_capacity(now) {
            self.rotate(now);
        }
    }

    /// Move to the next eligible slot after the active one (round-robin).
    /// Returns the newly active role, or `None` when every slot is out.
    pub fn rotate(&mut self, now: DateTime<Utc>) -> Option<KeyRole> {
        let count = self.slots.len();
        if count == 0 {
            return None;
        }

        let previous = self.active;
        let start = previous.map_or(0, |index| index + 1);
        let next = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|&index| self.slots[index].is_eligible(now));

        match next {
            Some(index) => {
                self.activate(index);
                let role = self.slots[index].role;
                if previous != Some(index) {
                    info!(
                        provider = %self.provider,
                        from = ?previous.map(|i| self.slots[i].role),
                        to = %role,
                        "Rotated API key slot"
                    );
                }
                Some(role)
            }
            None => {
                if previous.is_some() {
                    warn!(provider = %self.provider, "All API key slots exhausted");
                }
                self.deactivate_all();
                None
            }
        }
    }

    fn activate(&mut self, index: usize) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.is_active = i == index;
        }
        self.active = Some(index);
    }

    fn deactivate_all(&mut self) {
        for slot in &mut self.slots {
            slot.is_active = false;
        }
        self.active = None;
    }

    /// Serializable view of every slot
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<KeySlotSnapshot> {
        self.slots
            .iter()
            .map(|slot| KeySlotSnapshot {
                role: slot.role,
                is_active: slot.is_active,
                eligible: slot.is_eligible(now),
                quota_used: slot.quota_used,
                quota_limit: slot.quota_limit,
                window_start: slot.window_start,
                quota_reset_at: slot.quota_reset_at,
                success_rate: slot.success_rate,
                avg_latency_ms: slot.avg_latency_ms,
            })
            .collect()
    }
}

/// `now + duration`, saturating at the end of representable time
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
