//! Persistent daemon configuration and the live curve handle

use crate::actuator::ActuatorKind;
use crate::battery::BatteryPolicy;
use crate::control::SafetyPolicy;
use crate::curve::{Curve, CurveConfig};
use crate::ec::EcLayout;
use crate::errors::{FanControlError, Result};
use crate::sensors::SensorSource;
use crate::sysfs::SysfsRoot;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/omen-fan/config.json";
pub const CONFIG_PATH_ENV: &str = "OMEN_FAN_CONFIG";

/// Which hardware the daemon talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub actuator: ActuatorKind,
    /// Temperature backends to try, most trusted first.
    pub sensor_order: Vec<SensorSource>,
    pub ec: EcLayout,
    /// Prefix for every sysfs, debugfs and procfs path.
    pub sysfs_root: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            actuator: ActuatorKind::Auto,
            sensor_order: vec![
                SensorSource::Ec,
                SensorSource::HwMon,
                SensorSource::ThermalZone,
            ],
            ec: EcLayout::default(),
            sysfs_root: PathBuf::from("/"),
        }
    }
}

impl HardwareConfig {
    pub fn sysfs(&self) -> SysfsRoot {
        SysfsRoot::new(&self.sysfs_root)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub curve: CurveConfig,
    pub battery: BatteryPolicy,
    pub safety: SafetyPolicy,
    pub hardware: HardwareConfig,
}

impl DaemonConfig {
    /// `$OMEN_FAN_CONFIG`, or the system-wide default.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<()> {
        self.curve.validate()?;
        if self.battery.reduction_percent > 100 || self.battery.floor_percent > 100 {
            return Err(FanControlError::Config(
                "battery percentages must be within 0..=100".to_string(),
            ));
        }
        if self.safety.failsafe_duty_percent > 100 {
            return Err(FanControlError::Config(
                "failsafe duty must be within 0..=100".to_string(),
            ));
        }
        if self.safety.actuator_timeout_ms == 0 {
            return Err(FanControlError::Config(
                "actuator timeout must be greater than zero".to_string(),
            ));
        }
        if self.hardware.sensor_order.is_empty() {
            return Err(FanControlError::Config(
                "sensor order must name at least one source".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: DaemonConfig = serde_json::from_str(&json)
            .map_err(|e| FanControlError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let config = Self::load_from_file(path)?;
            info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        let config = Self::default();
        match config.save_to_file(path) {
            Ok(()) => info!("Wrote default configuration to {}", path.display()),
            Err(e) => error!("Could not write default configuration: {}", e),
        }
        Ok(config)
    }

    /// Write through a temporary file and rename over `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&temp_path, json)?;
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Accepts curve edits, validates them, and publishes them to the loop.
///
/// Cheap to clone; every clone feeds the same channel.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<CurveConfig>>>,
}

impl ConfigHandle {
    /// Validate `initial` and create the handle plus the loop's receiver.
    pub fn new(initial: CurveConfig) -> Result<(Self, watch::Receiver<Arc<CurveConfig>>)> {
        initial.validate()?;
        let (tx, rx) = watch::channel(Arc::new(initial));
        Ok((Self { tx: Arc::new(tx) }, rx))
    }

    pub fn current(&self) -> Arc<CurveConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Swap in `config` if it validates. The old snapshot stays in effect on error.
    pub fn replace(&self, config: CurveConfig) -> Result<Arc<CurveConfig>> {
        config.validate()?;
        let config = Arc::new(config);
        self.tx.send_replace(Arc::clone(&config));
        Ok(config)
    }

    pub fn set_curve(&self, curve: Curve) -> Result<Arc<CurveConfig>> {
        self.replace(self.current().with_curve(curve))
    }

    pub fn apply_preset(&self, name: &str) -> Result<Arc<CurveConfig>> {
        let curve = Curve::preset(name).ok_or_else(|| {
            FanControlError::Config(format!(
                "unknown preset '{}', expected one of: {}",
                name,
                Curve::preset_names().join(", ")
            ))
        })?;
        self.set_curve(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        assert_eq!(config.safety.sensor_loss_ticks, 3);
        assert_eq!(config.battery.reduction_percent, 20);
        assert_eq!(config.hardware.actuator, ActuatorKind::Auto);
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.json");

        let config = DaemonConfig::load_or_create(&path).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let reloaded = DaemonConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{ "curve": { "hysteresis_c": 5 }, "hardware": { "actuator": "hwmon" } }"#,
        )
        .unwrap();

        let config = DaemonConfig::load_from_file(&path).unwrap();
        assert_eq!(config.curve.hysteresis_c, 5);
        assert_eq!(config.curve.poll_interval_ms, 2000);
        assert_eq!(config.hardware.actuator, ActuatorKind::Hwmon);
        assert_eq!(config.hardware.sensor_order.len(), 3);
    }

    #[test]
    fn invalid_file_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{ "curve": { "curve": [ { "temp_c": 60, "duty_percent": 50 }, { "temp_c": 40, "duty_percent": 20 } ] } }"#,
        )
        .unwrap();
        assert!(DaemonConfig::load_from_file(&path).is_err());

        fs::write(&path, r#"{ "curve": { "poll_interval_ms": 0 } }"#).unwrap();
        assert!(DaemonConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn handle_rejects_invalid_and_keeps_old() {
        let (handle, rx) = ConfigHandle::new(CurveConfig::default()).unwrap();
        let bad = CurveConfig {
            max_step_percent_per_tick: 0,
            ..CurveConfig::default()
        };
        assert!(handle.replace(bad).is_err());
        assert_eq!(**rx.borrow(), CurveConfig::default());
    }

    #[test]
    fn handle_publishes_presets() {
        let (handle, mut rx) = ConfigHandle::new(CurveConfig::default()).unwrap();
        rx.borrow_and_update();

        handle.apply_preset("max").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().curve, Curve::max());
        assert_eq!(handle.current().hysteresis_c, 3);

        assert!(handle.apply_preset("turbo").is_err());
        assert!(!rx.has_changed().unwrap());
    }
}
