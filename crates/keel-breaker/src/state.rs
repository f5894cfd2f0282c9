//! The breaker state machine as a pure function.
//!
//! [`BreakerState::on`] takes the current state, an event, and the current
//! time, and returns the next state plus the transition it caused (if
//! any). It has no side effects; [`crate::CircuitBreaker`] applies the
//! result and emits the transition.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;

/// Coarse breaker state as reported to dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding of the state.
    pub fn ordinal(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full breaker state. Counters only exist in the states that use them,
/// so leaving a state always discards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed {
        failures: u32,
    },
    Open {
        since: SystemTime,
    },
    HalfOpen {
        successes: u32,
        /// Trial calls admitted but not yet reported.
        in_flight: u32,
        /// When the most recent trial call was admitted.
        last_trial: SystemTime,
    },
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    /// A caller asks whether it may proceed.
    Probe,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerStatus,
    pub to: BreakerStatus,
}

/// Result of feeding one event to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: BreakerState,
    pub transition: Option<Transition>,
    /// For [`BreakerEvent::Probe`], whether the call may proceed.
    /// Always true for outcome events.
    pub admitted: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::Closed { failures: 0 }
    }
}

impl BreakerState {
    pub fn status(&self) -> BreakerStatus {
        match self {
            Self::Closed { .. } => BreakerStatus::Closed,
            Self::Open { .. } => BreakerStatus::Open,
            Self::HalfOpen { .. } => BreakerStatus::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        match self {
            Self::Closed { failures } => *failures,
            _ => 0,
        }
    }

    pub fn success_count(&self) -> u32 {
        match self {
            Self::HalfOpen { successes, .. } => *successes,
            _ => 0,
        }
    }

    /// Compute the next state.
    pub fn on(self, event: BreakerEvent, config: &BreakerConfig, now: SystemTime) -> Step {
        match (self, event) {
            (Self::Closed { .. }, BreakerEvent::Probe) => self.stay(true),

            (Self::Open { since }, BreakerEvent::Probe) => {
                if elapsed(since, now) >= config.timeout {
                    self.to(
                        Self::HalfOpen {
                            successes: 0,
                            in_flight: 1,
                            last_trial: now,
                        },
                        true,
                    )
                } else {
                    self.stay(false)
                }
            }

            (
                Self::HalfOpen {
                    successes,
                    in_flight,
                    last_trial,
                },
                BreakerEvent::Probe,
            ) => {
                if in_flight < config.half_open_max_calls {
                    Self::HalfOpen {
                        successes,
                        in_flight: in_flight + 1,
                        last_trial: now,
                    }
                    .stay(true)
                } else if elapsed(last_trial, now) >= config.timeout {
                    // Trial slots that never reported back are reclaimed.
                    Self::HalfOpen {
                        successes,
                        in_flight: 1,
                        last_trial: now,
                    }
                    .stay(true)
                } else {
                    self.stay(false)
                }
            }

            (Self::Closed { .. }, BreakerEvent::Success) => {
                Self::Closed { failures: 0 }.stay(true)
            }

            (Self::Closed { failures }, BreakerEvent::Failure) => {
                let failures = failures.saturating_add(1);
                if failures >= config.failure_threshold {
                    self.to(Self::Open { since: now }, true)
                } else {
                    Self::Closed { failures }.stay(true)
                }
            }

            (
                Self::HalfOpen {
                    successes,
                    in_flight,
                    last_trial,
                },
                BreakerEvent::Success,
            ) => {
                let successes = successes.saturating_add(1);
                if successes >= config.success_threshold {
                    self.to(Self::Closed { failures: 0 }, true)
                } else {
                    Self::HalfOpen {
                        successes,
                        in_flight: in_flight.saturating_sub(1),
                        last_trial,
                    }
                    .stay(true)
                }
            }

            (Self::HalfOpen { .. }, BreakerEvent::Failure) => {
                self.to(Self::Open { since: now }, true)
            }

            // Late results from calls admitted before the trip.
            (Self::Open { .. }, BreakerEvent::Success | BreakerEvent::Failure) => self.stay(true),
        }
    }

    fn stay(self, admitted: bool) -> Step {
        Step {
            state: self,
            transition: None,
            admitted,
        }
    }

    fn to(self, next: Self, admitted: bool) -> Step {
        Step {
            state: next,
            transition: Some(Transition {
                from: self.status(),
                to: next.status(),
            }),
            admitted,
        }
    }
}

/// Time since `earlier`; zero if the clock went backwards.
fn elapsed(earlier: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}
