//! Per-source alert cooldown.
//!
//! Two states, `Idle` and `Cooling`. Only danger verdicts are evaluated; the
//! cooldown runs from the most recent *allowed* alert and is not extended by
//! denied attempts, so a sustained threat alerts at a fixed cadence.
//!
//! Cooldown state lives for the process lifetime only. A restart resets every
//! source to `Idle`.

use std::time::{Duration, Instant};

/// Minimum time between alerts for one source.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Idle,
    Cooling { since: Instant },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied { remaining: Duration },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

#[derive(Clone, Debug)]
pub struct AlertGate {
    state: GateState,
    cooldown: Duration,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: GateState::Idle,
            cooldown,
        }
    }

    /// Evaluate a danger verdict arriving at `now`.
    pub fn evaluate(&mut self, now: Instant) -> GateDecision {
        if let GateState::Cooling { since } = self.state {
            let elapsed = now.saturating_duration_since(since);
            if elapsed < self.cooldown {
                return GateDecision::Denied {
                    remaining: self.cooldown - elapsed,
                };
            }
            self.state = GateState::Idle;
        }

        self.state = GateState::Cooling { since: now };
        GateDecision::Allowed
    }

    /// True while a new alert would be denied at `now`.
    pub fn is_cooling(&self, now: Instant) -> bool {
        match self.state {
            GateState::Idle => false,
            GateState::Cooling { since } => now.saturating_duration_since(since) < self.cooldown,
        }
    }

    pub fn last_allowed(&self) -> Option<Instant> {
        match self.state {
            GateState::Idle => None,
            GateState::Cooling { since } => Some(since),
        }
    }

}
