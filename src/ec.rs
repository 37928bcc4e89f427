//! Embedded controller register access through the `ec_sys` debugfs node.
//!
//! Requires `ec_sys` loaded with `write_support=1` for the actuator side.

use crate::errors::Result;
use crate::sysfs::SysfsRoot;
use log::debug;
use serde::{Deserialize, Serialize};

/// Register map of the OMEN embedded controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcLayout {
    /// Register file relative to the sysfs root.
    pub io_path: String,
    pub cpu_temp_register: u8,
    pub gpu_temp_register: u8,
    /// Fan duty set-point registers, in percent.
    pub fan_duty_registers: Vec<u8>,
    pub bios_control_register: u8,
    pub bios_manual_value: u8,
    pub bios_auto_value: u8,
}

impl Default for EcLayout {
    fn default() -> Self {
        Self {
            io_path: "sys/kernel/debug/ec/ec0/io".to_string(),
            cpu_temp_register: 0x57,
            gpu_temp_register: 0xB7,
            fan_duty_registers: vec![0x2C, 0x2D],
            bios_control_register: 0x62,
            bios_manual_value: 0x06,
            bios_auto_value: 0x00,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EcPort {
    sysfs: SysfsRoot,
    layout: EcLayout,
}

impl EcPort {
    /// Open the EC register file if the kernel exposes it.
    pub fn probe(sysfs: &SysfsRoot, layout: &EcLayout) -> Option<Self> {
        if sysfs.exists(&layout.io_path) {
            Some(Self {
                sysfs: sysfs.clone(),
                layout: layout.clone(),
            })
        } else {
            debug!("EC register file not present: {}", sysfs.path(&layout.io_path).display());
            None
        }
    }

    pub fn layout(&self) -> &EcLayout {
        &self.layout
    }

    pub fn read(&self, register: u8) -> Result<u8> {
        self.sysfs.read_byte_at(&self.layout.io_path, register)
    }

    pub fn write(&self, register: u8, value: u8) -> Result<()> {
        debug!("EC write 0x{:02X} <- 0x{:02X}", register, value);
        self.sysfs.write_byte_at(&self.layout.io_path, register, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_probe_requires_io_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());
        assert!(EcPort::probe(&sysfs, &EcLayout::default()).is_none());

        let dir = tmp.path().join("sys/kernel/debug/ec/ec0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("io"), vec![0u8; 256]).unwrap();

        let port = EcPort::probe(&sysfs, &EcLayout::default()).unwrap();
        port.write(0x62, 0x06).unwrap();
        assert_eq!(port.read(0x62).unwrap(), 0x06);
    }
}
