//! Hysteresis alert state machine
//!
//! Turns a per-cycle "condition present / absent" signal into debounced
//! alert edges, independently for each named alert class.
//!
//! ```text
//!            present            count == patience
//!   QUIET ───────────► ARMING ───────────────────► ESCALATED ──┐
//!     ▲                  │ absent (count−1)           │  ▲     │ present, interval
//!     │                  ▼                            │  │     │ elapsed → Persists
//!     └──────────── count == 0                 absent │  │ present
//!     ▲                                               ▼  │
//!     └──────────────── count == 0 ───────────── DEARMING
//!                       (Resolved)
//! ```
//!
//! The counter moves by one per cycle in either direction and is capped at
//! `patience`, so an episode needs `patience` consecutive present cycles to
//! raise and `patience` consecutive absent cycles to resolve. A single good
//! cycle in the middle of intermittent failures only steps the counter down.

use crate::config::defaults::{
    ERROR_REUPDATE_INTERVAL_SECS, PATIENCE, THRESHOLD_REUPDATE_INTERVAL_SECS,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Alert class for instruments that failed to produce a value.
pub const READ_ERROR: &str = "read-error";

/// Alert class for readings above their threshold.
pub const THRESHOLD_EXCEEDED: &str = "threshold-exceeded";

/// Debounce parameters for one alert class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisPolicy {
    /// Consecutive cycles needed to change state, in both directions.
    pub patience: u32,
    /// Minimum time between "persists" reminders while active.
    pub reupdate_interval: Duration,
}

impl HysteresisPolicy {
    pub fn new(patience: u32, reupdate_interval: Duration) -> Self {
        Self {
            patience: patience.max(1),
            reupdate_interval,
        }
    }

    /// Defaults for the read-error class (30 min reminders).
    pub fn read_errors() -> Self {
        Self::new(PATIENCE, Duration::from_secs(ERROR_REUPDATE_INTERVAL_SECS))
    }

    /// Defaults for the threshold class (10 min reminders).
    pub fn thresholds() -> Self {
        Self::new(
            PATIENCE,
            Duration::from_secs(THRESHOLD_REUPDATE_INTERVAL_SECS),
        )
    }
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self::thresholds()
    }
}

/// Edge produced by an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Became active. Pages on-call.
    Raised,
    /// Still active and the reminder interval elapsed.
    Persists,
    /// Counter drained back to zero while active.
    Resolved,
}

/// Named position in the state diagram, derived from the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Quiet,
    Arming,
    Escalated,
    Dearming,
}

/// Per-class counters. Starts QUIET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertClassState {
    consecutive_count: u32,
    is_active: bool,
    last_escalation: Option<Instant>,
}

impl AlertClassState {
    pub fn consecutive_count(&self) -> u32 {
        self.consecutive_count
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn last_escalation(&self) -> Option<Instant> {
        self.last_escalation
    }

    pub fn phase(&self, policy: &HysteresisPolicy) -> Phase {
        match (self.is_active, self.consecutive_count) {
            (false, 0) => Phase::Quiet,
            (false, _) => Phase::Arming,
            (true, n) if n >= policy.patience => Phase::Escalated,
            (true, _) => Phase::Dearming,
        }
    }

    /// Feed one cycle's observation.
    pub fn observe(
        &mut self,
        present: bool,
        now: Instant,
        policy: &HysteresisPolicy,
    ) -> Option<Transition> {
        if present {
            self.consecutive_count = (self.consecutive_count + 1).min(policy.patience);

            if !self.is_active {
                if self.consecutive_count >= policy.patience {
                    self.is_active = true;
                    self.last_escalation = Some(now);
                    return Some(Transition::Raised);
                }
                return None;
            }

            let since = self
                .last_escalation
                .map_or(Duration::MAX, |last| now.saturating_duration_since(last));
            if since > policy.reupdate_interval {
                self.last_escalation = Some(now);
                return Some(Transition::Persists);
            }
            None
        } else {
            self.consecutive_count = self.consecutive_count.saturating_sub(1);
            if self.is_active && self.consecutive_count == 0 {
                self.is_active = false;
                return Some(Transition::Resolved);
            }
            None
        }
    }
}

/// All alert classes of one monitor, created lazily on first observation.
#[derive(Debug, Clone, Default)]
pub struct HysteresisMachine {
    default_policy: HysteresisPolicy,
    policies: HashMap<String, HysteresisPolicy>,
    states: HashMap<String, AlertClassState>,
}

impl HysteresisMachine {
    pub fn new(default_policy: HysteresisPolicy) -> Self {
        Self {
            default_policy,
            policies: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Register a class-specific policy.
    pub fn with_policy(mut self, class: impl Into<String>, policy: HysteresisPolicy) -> Self {
        self.policies.insert(class.into(), policy);
        self
    }

    pub fn policy(&self, class: &str) -> HysteresisPolicy {
        self.policies
            .get(class)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Feed one cycle's observation for `class`.
    pub fn observe(&mut self, class: &str, present: bool, now: Instant) -> Option<Transition> {
        let policy = self.policy(class);
        let state = self.states.entry(class.to_string()).or_default();
        let transition = state.observe(present, now, &policy);
        if let Some(t) = transition {
            tracing::debug!(
                class,
                transition = ?t,
                count = state.consecutive_count,
                "Alert class transition"
            );
        }
        transition
    }

    pub fn state(&self, class: &str) -> Option<&AlertClassState> {
        self.states.get(class)
    }

    pub fn is_active(&self, class: &str) -> bool {
        self.states.get(class).is_some_and(AlertClassState::is_active)
    }

    pub fn phase(&self, class: &str) -> Phase {
        self.states
            .get(class)
            .map_or(Phase::Quiet, |s| s.phase(&self.policy(class)))
    }
}
