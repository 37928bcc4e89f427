//! Fan actuator gateway
//!
//! Exactly one actuator instance exists per daemon, owned by the control
//! loop. Methods take `&mut self` so writes can only be issued by that owner.

pub mod ec;
pub mod hwmon;

pub use ec::EcActuator;
pub use hwmon::HwmonActuator;

use crate::ec::EcLayout;
use crate::errors::ActuatorError;
use crate::sysfs::SysfsRoot;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait FanActuator: Send {
    /// Short human-readable name for logs and status output.
    fn describe(&self) -> String;

    /// Set every controllable fan to `percent` (0..=100).
    async fn apply_duty_percent(&mut self, percent: u8) -> Result<(), ActuatorError>;

    /// Hand fan control to the firmware (`true`) or take it away (`false`).
    async fn set_bios_auto_control(&mut self, enabled: bool) -> Result<(), ActuatorError>;
}

/// Stand-in when no writable fan interface exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedActuator;

#[async_trait]
impl FanActuator for UnsupportedActuator {
    fn describe(&self) -> String {
        "none".to_string()
    }

    async fn apply_duty_percent(&mut self, _percent: u8) -> Result<(), ActuatorError> {
        Err(ActuatorError::Unsupported(
            "no fan control interface on this machine".to_string(),
        ))
    }

    async fn set_bios_auto_control(&mut self, _enabled: bool) -> Result<(), ActuatorError> {
        Err(ActuatorError::Unsupported(
            "no fan control interface on this machine".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// EC first, then hwmon, then none.
    #[default]
    Auto,
    Ec,
    Hwmon,
    None,
}

/// Build the actuator for `kind`, falling back to [`UnsupportedActuator`].
pub fn select(sysfs: &SysfsRoot, kind: ActuatorKind, ec: &EcLayout) -> Box<dyn FanActuator> {
    let ec_actuator = || EcActuator::probe(sysfs, ec).map(boxed);
    let hwmon_actuator = || HwmonActuator::discover(sysfs).map(boxed);

    let chosen = match kind {
        ActuatorKind::Auto => ec_actuator().or_else(hwmon_actuator),
        ActuatorKind::Ec => ec_actuator(),
        ActuatorKind::Hwmon => hwmon_actuator(),
        ActuatorKind::None => None,
    };

    match chosen {
        Some(actuator) => {
            info!("Fan actuator: {}", actuator.describe());
            actuator
        }
        None => {
            if kind != ActuatorKind::None {
                warn!("No {:?} fan actuator found; running monitoring-only", kind);
            }
            Box::new(UnsupportedActuator)
        }
    }
}

fn boxed<A: FanActuator + 'static>(actuator: A) -> Box<dyn FanActuator> {
    Box::new(actuator)
}
