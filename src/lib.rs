//! HP OMEN fan control
//!
//! Reads CPU and GPU temperatures, maps the hottest one through a fan curve,
//! and drives the fans through the embedded controller or hwmon, handing
//! control back to the BIOS on exit.

pub mod actuator;
pub mod args;
pub mod battery;
pub mod client;
pub mod config;
pub mod control;
pub mod curve;
pub mod daemon;
pub mod ec;
pub mod errors;
pub mod hysteresis;
pub mod logging;
pub mod monitor;
pub mod power;
pub mod sensors;
pub mod smoothing;
pub mod sysfs;

pub const DBUS_SERVICE_NAME: &str = "com.omenfan.FanDaemon";
pub const DBUS_OBJECT_PATH: &str = "/com/omenfan/FanDaemon";
pub const DBUS_INTERFACE_NAME: &str = "com.omenfan.FanDaemon";

// Re-export commonly used types
pub use config::{ConfigHandle, DaemonConfig};
pub use control::{ControlLoop, LifecycleState, TickEvent, TickReason};
pub use curve::{Curve, CurveConfig, CurvePoint};
pub use errors::{ActuatorError, FanControlError, Result};
