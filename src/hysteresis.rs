//! Gate deciding whether a tick re-sends a duty to the fan.
//!
//! Besides filtering small temperature wobble, the gate re-sends the current
//! duty once `force_reapply_interval_sec` has passed. HP firmware hands fan
//! control back to the BIOS when no manual write arrives before its internal
//! countdown runs out, and without the periodic re-send a custom curve goes
//! quietly inactive a few minutes after start-up.

use crate::control::ControlState;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Nothing has been written yet this run.
    FirstApplication,
    /// Temperature moved by at least the hysteresis band.
    TemperatureDelta,
    /// The keep-alive interval elapsed.
    ForcedReapply,
    Hold,
}

impl GateDecision {
    pub fn is_apply(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

pub fn decide(
    state: &ControlState,
    new_max_temp_c: i32,
    hysteresis_c: u32,
    force_reapply_interval_sec: u64,
    now: Instant,
) -> GateDecision {
    if state.last_applied_duty.is_none() {
        return GateDecision::FirstApplication;
    }

    let delta = (i64::from(new_max_temp_c) - i64::from(state.last_observed_max_temp_c)).abs();
    if delta >= i64::from(hysteresis_c) {
        return GateDecision::TemperatureDelta;
    }

    let elapsed = now.saturating_duration_since(state.last_apply_timestamp);
    if elapsed >= Duration::from_secs(force_reapply_interval_sec) {
        return GateDecision::ForcedReapply;
    }

    GateDecision::Hold
}

pub fn should_apply(
    state: &ControlState,
    new_max_temp_c: i32,
    hysteresis_c: u32,
    force_reapply_interval_sec: u64,
    now: Instant,
) -> bool {
    decide(
        state,
        new_max_temp_c,
        hysteresis_c,
        force_reapply_interval_sec,
        now,
    )
    .is_apply()
}
