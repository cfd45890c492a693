//! Gear arbitration - turns raw recommendations into stable, rate-limited shifts.
//!
//! A shift to a different gear happens when either the recommendation is the
//! most conservative gear (emergency, bypasses cooldown) or the configured
//! cooldown has elapsed since the last executed shift. Deciding is pure; the
//! caller commits a shift only after the actuator accepted it.

use crate::types::GearLevel;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftReason {
    /// Initial gear applied before the first sample
    Boot,
    /// Most conservative gear requested; cooldown ignored
    Emergency,
    /// Cooldown satisfied
    Scheduled,
    /// Final fallback on the way out
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDecision {
    /// Already in the recommended gear
    Hold,
    Shift {
        from: GearLevel,
        to: GearLevel,
        reason: ShiftReason,
    },
    /// Change wanted but the cooldown has not elapsed
    Deferred {
        wanted: GearLevel,
        remaining: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct GearArbiter {
    current: GearLevel,
    lowest: GearLevel,
    cooldown: Duration,
    last_shift: Option<Instant>,
    shifts: u64,
}

impl GearArbiter {
    /// Start in `initial`. The boot gear does not count as a shift, so the first
    /// real shift is never held back by the cooldown.
    pub fn new(initial: GearLevel, lowest: GearLevel, cooldown: Duration) -> Self {
        Self {
            current: initial,
            lowest,
            cooldown,
            last_shift: None,
            shifts: 0,
        }
    }

    pub fn current(&self) -> GearLevel {
        self.current
    }

    /// Number of committed shifts (boot excluded).
    pub fn shifts(&self) -> u64 {
        self.shifts
    }

    /// The decision for the boot gear.
    pub fn boot(&self) -> ShiftDecision {
        ShiftDecision::Shift {
            from: self.current,
            to: self.current,
            reason: ShiftReason::Boot,
        }
    }

    pub fn decide(&self, recommended: GearLevel, now: Instant) -> ShiftDecision {
        if recommended == self.current {
            return ShiftDecision::Hold;
        }

        if recommended <= self.lowest {
            return ShiftDecision::Shift {
                from: self.current,
                to: recommended,
                reason: ShiftReason::Emergency,
            };
        }

        let elapsed = match self.last_shift {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::MAX,
        };

        if elapsed >= self.cooldown {
            ShiftDecision::Shift {
                from: self.current,
                to: recommended,
                reason: ShiftReason::Scheduled,
            }
        } else {
            ShiftDecision::Deferred {
                wanted: recommended,
                remaining: self.cooldown - elapsed,
            }
        }
    }

    /// Forced move to the most conservative gear, regardless of state.
    pub fn shutdown(&self) -> ShiftDecision {
        ShiftDecision::Shift {
            from: self.current,
            to: self.lowest,
            reason: ShiftReason::Shutdown,
        }
    }

    /// Record that the actuator executed a shift to `to` at `now`.
    pub fn commit(&mut self, to: GearLevel, now: Instant) {
        if to != self.current {
            self.shifts += 1;
            self.last_shift = Some(now);
        }
        self.current = to;
    }
}
