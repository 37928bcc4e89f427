use super::FanActuator;
use crate::curve::MAX_DUTY_PERCENT;
use crate::ec::{EcLayout, EcPort};
use crate::errors::ActuatorError;
use crate::sysfs::{self, SysfsRoot};
use async_trait::async_trait;
use log::debug;

/// Writes fan set-points and the BIOS control flag into EC registers.
pub struct EcActuator {
    port: EcPort,
}

impl EcActuator {
    pub fn probe(sysfs: &SysfsRoot, layout: &EcLayout) -> Option<Self> {
        if layout.fan_duty_registers.is_empty() {
            return None;
        }
        EcPort::probe(sysfs, layout).map(|port| Self { port })
    }
}

#[async_trait]
impl FanActuator for EcActuator {
    fn describe(&self) -> String {
        format!("ec ({} fans)", self.port.layout().fan_duty_registers.len())
    }

    async fn apply_duty_percent(&mut self, percent: u8) -> Result<(), ActuatorError> {
        let percent = percent.min(MAX_DUTY_PERCENT);
        let port = self.port.clone();
        sysfs::unblock(move || {
            port.layout()
                .fan_duty_registers
                .iter()
                .try_for_each(|&register| port.write(register, percent))
        })
        .await?;
        debug!("EC fan duty set to {}%", percent);
        Ok(())
    }

    async fn set_bios_auto_control(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        let layout = self.port.layout();
        let value = if enabled {
            layout.bios_auto_value
        } else {
            layout.bios_manual_value
        };
        let register = layout.bios_control_register;
        let port = self.port.clone();
        sysfs::unblock(move || port.write(register, value)).await?;
        debug!("EC BIOS fan control {}", if enabled { "restored" } else { "suspended" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ec_file(root: &std::path::Path) -> std::path::PathBuf {
        let dir = root.join("sys/kernel/debug/ec/ec0");
        fs::create_dir_all(&dir).unwrap();
        let io = dir.join("io");
        fs::write(&io, vec![0u8; 256]).unwrap();
        io
    }

    #[tokio::test]
    async fn writes_both_fans_and_control_register() {
        let tmp = tempfile::tempdir().unwrap();
        let io = ec_file(tmp.path());
        let mut actuator =
            EcActuator::probe(&SysfsRoot::new(tmp.path()), &EcLayout::default()).unwrap();

        actuator.set_bios_auto_control(false).await.unwrap();
        actuator.apply_duty_percent(58).await.unwrap();

        let regs = fs::read(&io).unwrap();
        assert_eq!(regs[0x62], 0x06);
        assert_eq!(regs[0x2C], 58);
        assert_eq!(regs[0x2D], 58);

        actuator.set_bios_auto_control(true).await.unwrap();
        assert_eq!(fs::read(&io).unwrap()[0x62], 0x00);
    }

    #[tokio::test]
    async fn missing_register_file_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let io = ec_file(tmp.path());
        let mut actuator =
            EcActuator::probe(&SysfsRoot::new(tmp.path()), &EcLayout::default()).unwrap();

        fs::remove_file(io).unwrap();
        assert!(matches!(
            actuator.apply_duty_percent(40).await,
            Err(ActuatorError::Unsupported(_))
        ));
    }
}
