use super::FanActuator;
use crate::curve::MAX_DUTY_PERCENT;
use crate::errors::ActuatorError;
use crate::sysfs::{self, SysfsRoot};
use async_trait::async_trait;
use log::{debug, info};

const HWMON_DIR: &str = "sys/class/hwmon";

/// `pwmN_enable` value for manual control.
const PWM_MODE_MANUAL: &str = "1";
/// `pwmN_enable` value for firmware/automatic control.
const PWM_MODE_AUTO: &str = "2";

/// Fan control through hwmon `pwmN` / `pwmN_enable` nodes.
///
/// The `hp` hwmon device registered by hp-wmi only exposes `pwm1_enable`;
/// there the BIOS toggle works but duty writes report `Unsupported`.
#[derive(Debug, Clone)]
pub struct HwmonActuator {
    sysfs: SysfsRoot,
    device_dir: String,
    device_name: String,
    channels: Vec<u8>,
}

impl HwmonActuator {
    /// Find the hp-wmi hwmon device, or failing that the first device with
    /// a `pwmN_enable` node.
    pub fn discover(sysfs: &SysfsRoot) -> Option<Self> {
        let devices = sysfs.list_dir(HWMON_DIR).ok()?;
        let candidates: Vec<(String, String)> = devices
            .into_iter()
            .filter_map(|dev| {
                let dir = format!("{}/{}", HWMON_DIR, dev);
                let name = sysfs.read_optional(format!("{}/name", dir)).ok().flatten()?;
                Some((dir, name))
            })
            .filter(|(dir, _)| !enable_channels(sysfs, dir).is_empty())
            .collect();

        let (device_dir, device_name) = candidates
            .iter()
            .find(|(_, name)| name == "hp")
            .or_else(|| candidates.first())
            .cloned()?;

        let channels = enable_channels(sysfs, &device_dir);
        info!(
            "hwmon fan device '{}' at {} (channels {:?})",
            device_name, device_dir, channels
        );
        Some(Self {
            sysfs: sysfs.clone(),
            device_dir,
            device_name,
            channels,
        })
    }

    /// Write `value` to `pwmN{suffix}` of every channel, off the executor.
    /// With `only_existing`, channels lacking the node are skipped; the
    /// returned count says how many were written.
    async fn write_channels(
        &self,
        suffix: &'static str,
        value: String,
        only_existing: bool,
    ) -> crate::errors::Result<usize> {
        let root = self.sysfs.clone();
        let dir = self.device_dir.clone();
        let channels = self.channels.clone();
        sysfs::unblock(move || {
            let mut written = 0;
            for n in channels {
                let node = format!("{}/pwm{}{}", dir, n, suffix);
                if only_existing && !root.exists(&node) {
                    continue;
                }
                root.write(node, &value)?;
                written += 1;
            }
            Ok(written)
        })
        .await
    }
}

fn enable_channels(sysfs: &SysfsRoot, dir: &str) -> Vec<u8> {
    (1..=4)
        .filter(|n| sysfs.exists(format!("{}/pwm{}_enable", dir, n)))
        .collect()
}

/// Convert a 0..=100 duty to the 0..=255 PWM scale.
pub fn percent_to_pwm(percent: u8) -> u8 {
    (u32::from(percent.min(MAX_DUTY_PERCENT)) * 255 / 100) as u8
}

#[async_trait]
impl FanActuator for HwmonActuator {
    fn describe(&self) -> String {
        format!("hwmon {} ({})", self.device_name, self.device_dir)
    }

    async fn apply_duty_percent(&mut self, percent: u8) -> Result<(), ActuatorError> {
        let pwm = percent_to_pwm(percent);
        let written = self.write_channels("", pwm.to_string(), true).await?;
        if written == 0 {
            return Err(ActuatorError::Unsupported(format!(
                "{} exposes no pwm duty node",
                self.device_name
            )));
        }
        debug!("Set fan PWM to {} ({}%)", pwm, percent);
        Ok(())
    }

    async fn set_bios_auto_control(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        let mode = if enabled { PWM_MODE_AUTO } else { PWM_MODE_MANUAL };
        self.write_channels("_enable", mode.to_string(), false).await?;
        debug!("hwmon pwm_enable set to {}", mode);
        Ok(())
    }
}
