use super::{SensorBackend, SensorSource};
use crate::ec::{EcLayout, EcPort};
use crate::sysfs::{self, SysfsRoot};
use async_trait::async_trait;
use log::debug;

/// Temperatures straight from the embedded controller's registers.
pub struct EcSensor {
    port: EcPort,
}

impl EcSensor {
    pub fn probe(sysfs: &SysfsRoot, layout: &EcLayout) -> Option<Self> {
        EcPort::probe(sysfs, layout).map(Self::new)
    }

    pub fn new(port: EcPort) -> Self {
        Self { port }
    }

    async fn read_register(&self, register: u8) -> Option<i32> {
        let port = self.port.clone();
        match sysfs::unblock(move || port.read(register)).await {
            // The EC reports 0x00 before its first poll and 0xFF for an absent sensor.
            Ok(0x00) | Ok(0xFF) => None,
            Ok(value) => Some(i32::from(value)),
            Err(e) => {
                debug!("EC register 0x{:02X} read failed: {}", register, e);
                None
            }
        }
    }
}

#[async_trait]
impl SensorBackend for EcSensor {
    fn source(&self) -> SensorSource {
        SensorSource::Ec
    }

    async fn read_cpu_temp_c(&self) -> Option<i32> {
        self.read_register(self.port.layout().cpu_temp_register).await
    }

    async fn read_gpu_temp_c(&self) -> Option<i32> {
        self.read_register(self.port.layout().gpu_temp_register).await
    }
}
