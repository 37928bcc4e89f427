//! Power source detection

use crate::sysfs::SysfsRoot;
use log::debug;

/// Answers whether the machine is currently running on battery.
pub trait PowerSource: Send {
    fn on_battery(&self) -> bool;
}

/// Reads the mains adapter state from `/sys/class/power_supply`.
///
/// A machine without a detectable adapter is treated as mains powered, so the
/// battery reduction never kicks in on hardware we can't read.
#[derive(Debug, Clone)]
pub struct SysfsPowerSource {
    sysfs: SysfsRoot,
}

const POWER_SUPPLY_DIR: &str = "sys/class/power_supply";

impl SysfsPowerSource {
    pub fn new(sysfs: SysfsRoot) -> Self {
        Self { sysfs }
    }

    /// Name and online state of the first `Mains` supply.
    pub fn mains_adapter(&self) -> Option<(String, bool)> {
        let entries = self.sysfs.list_dir(POWER_SUPPLY_DIR).ok()?;
        entries.into_iter().find_map(|name| {
            let base = format!("{}/{}", POWER_SUPPLY_DIR, name);
            let kind = self.sysfs.read_optional(format!("{}/type", base)).ok().flatten();
            if kind.as_deref() != Some("Mains") {
                return None;
            }
            let online = self
                .sysfs
                .read_optional(format!("{}/online", base))
                .ok()
                .flatten()
                .as_deref()
                == Some("1");
            Some((name, online))
        })
    }
}

impl PowerSource for SysfsPowerSource {
    fn on_battery(&self) -> bool {
        match self.mains_adapter() {
            Some((name, false)) => {
                debug!("Mains adapter {} offline", name);
                true
            }
            _ => false,
        }
    }
}

/// Fixed answer, for machines or runs where power state is known up front.
#[derive(Debug, Clone, Copy)]
pub struct FixedPowerSource(pub bool);

impl PowerSource for FixedPowerSource {
    fn on_battery(&self) -> bool {
        self.0
    }
}
