//! Deadline bookkeeping for a fallback chain.
//!
//! The overall request deadline is split across the candidates still to be
//! tried: each attempt gets `remaining / remaining_candidates`, floored at a
//! minimum and never beyond the overall deadline.

use std::time::Duration;
use tokio::time::Instant;

/// Time budget for one routed request
#[derive(Debug, Clone, Copy)]
pub struct AttemptBudget {
    started: Instant,
    deadline: Instant,
    total: Duration,
    min_attempt: Duration,
}

impl AttemptBudget {
    /// Start a budget of `total` from now
    #[must_use]
    pub fn start(total: Duration, min_attempt: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + total,
            total,
            min_attempt,
        }
    }

    /// The overall deadline
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Configured overall budget
    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Time since the budget started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the overall deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the overall deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Timeout for the next attempt given how many candidates are left
    /// (including the one about to run)
    #[must_use]
    pub fn attempt_timeout(&self, remaining_candidates: usize) -> Duration {
        let remaining = self.remaining();
        let share = remaining / remaining_candidates.max(1) as u32;
        share.max(self.min_attempt).min(remaining)
    }

    /// Absolute deadline for the next attempt
    #[must_use]
    pub fn attempt_deadline(&self, remaining_candidates: usize) -> Instant {
        (Instant::now() + self.attempt_timeout(remaining_candidates)).min(self.deadline)
    }
}
