//! Duty reduction while running on battery

use serde::{Deserialize, Serialize};

/// Battery-saving policy. The defaults come from OMEN firmware behaviour and
/// are worth retuning on other models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryPolicy {
    pub enabled: bool,
    pub reduction_percent: u8,
    pub critical_temp_c: i32,
    pub floor_percent: u8,
}

impl Default for BatteryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            reduction_percent: 20,
            critical_temp_c: 85,
            floor_percent: 20,
        }
    }
}

impl BatteryPolicy {
    pub fn apply(&self, target_duty: u8, on_battery: bool, max_temp_c: i32) -> u8 {
        if !self.enabled {
            return target_duty;
        }
        adjust(
            target_duty,
            on_battery,
            self.reduction_percent,
            max_temp_c,
            self.critical_temp_c,
            self.floor_percent,
        )
    }
}

/// Reduce `target_duty` on battery unless the temperature is critical.
///
/// On battery the result is never below `floor_percent`, so a curve that
/// asks for 0% still keeps the fans turning.
pub fn adjust(
    target_duty: u8,
    on_battery: bool,
    reduction_percent: u8,
    max_temp_c: i32,
    critical_temp_c: i32,
    floor_percent: u8,
) -> u8 {
    if !on_battery || max_temp_c >= critical_temp_c {
        return target_duty;
    }
    target_duty
        .saturating_sub(reduction_percent)
        .max(floor_percent)
}
