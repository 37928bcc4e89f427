use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Mutable bookkeeping of the control loop. Only the loop writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlState {
    pub last_applied_duty: Option<u8>,
    pub last_observed_max_temp_c: i32,
    pub last_apply_timestamp: Instant,
    pub manual_control_active: bool,
    pub bios_auto_control_suppressed: bool,
    pub on_battery_power: bool,
    /// Goal of a smoothed ramp that has not been reached yet.
    pub ramp_goal: Option<u8>,
}

impl ControlState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_applied_duty: None,
            last_observed_max_temp_c: 0,
            last_apply_timestamp: now,
            manual_control_active: false,
            bios_auto_control_suppressed: false,
            on_battery_power: false,
            ramp_goal: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Ended because of a hardware fault; needs an external restart.
    Faulted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}
