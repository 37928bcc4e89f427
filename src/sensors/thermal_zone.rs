use super::{SensorBackend, SensorSource};
use crate::sysfs::{self, SysfsRoot};
use async_trait::async_trait;
use log::debug;

const THERMAL_DIR: &str = "sys/class/thermal";

// Zone types in preference order.
const CPU_ZONE_TYPES: &[&str] = &["x86_pkg_temp", "TCPU", "CPUZ", "acpitz"];
const GPU_ZONE_TYPES: &[&str] = &["TGPU", "GPUZ", "gpu-thermal"];

/// Last-resort readings from firmware-published ACPI thermal zones.
pub struct ThermalZoneSensor {
    sysfs: SysfsRoot,
    cpu_zone: Option<String>,
    gpu_zone: Option<String>,
}

impl ThermalZoneSensor {
    pub fn discover(sysfs: &SysfsRoot) -> Option<Self> {
        let zones: Vec<(String, String)> = sysfs
            .list_dir(THERMAL_DIR)
            .unwrap_or_default()
            .into_iter()
            .filter(|name| name.starts_with("thermal_zone"))
            .filter_map(|zone| {
                let kind = sysfs
                    .read_optional(format!("{}/{}/type", THERMAL_DIR, zone))
                    .ok()
                    .flatten()?;
                Some((zone, kind))
            })
            .collect();

        let pick = |types: &[&str]| {
            types.iter().find_map(|want| {
                zones
                    .iter()
                    .find(|(_, kind)| kind == want)
                    .map(|(zone, _)| format!("{}/{}/temp", THERMAL_DIR, zone))
            })
        };

        let cpu_zone = pick(CPU_ZONE_TYPES);
        let gpu_zone = pick(GPU_ZONE_TYPES);
        if cpu_zone.is_none() && gpu_zone.is_none() {
            return None;
        }
        debug!("thermal zones: cpu={:?} gpu={:?}", cpu_zone, gpu_zone);
        Some(Self {
            sysfs: sysfs.clone(),
            cpu_zone,
            gpu_zone,
        })
    }

    async fn read_zone(&self, zone: Option<&str>) -> Option<i32> {
        let zone = zone?.to_string();
        let root = self.sysfs.clone();
        sysfs::unblock(move || root.read_parse::<i32>(zone))
            .await
            .map(|millidegrees| millidegrees / 1000)
            .map_err(|e| debug!("thermal zone read failed: {}", e))
            .ok()
    }
}

#[async_trait]
impl SensorBackend for ThermalZoneSensor {
    fn source(&self) -> SensorSource {
        SensorSource::ThermalZone
    }

    async fn read_cpu_temp_c(&self) -> Option<i32> {
        self.read_zone(self.cpu_zone.as_deref()).await
    }

    async fn read_gpu_temp_c(&self) -> Option<i32> {
        self.read_zone(self.gpu_zone.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn zone(root: &Path, n: u8, kind: &str, millis: i32) {
        let dir = root.join(format!("sys/class/thermal/thermal_zone{}", n));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("type"), format!("{}\n", kind)).unwrap();
        fs::write(dir.join("temp"), format!("{}\n", millis)).unwrap();
    }

    #[tokio::test]
    async fn prefers_package_zone_over_acpitz() {
        let tmp = tempfile::tempdir().unwrap();
        zone(tmp.path(), 0, "acpitz", 45000);
        zone(tmp.path(), 1, "x86_pkg_temp", 68000);
        fs::create_dir_all(tmp.path().join("sys/class/thermal/cooling_device0")).unwrap();

        let sensor = ThermalZoneSensor::discover(&SysfsRoot::new(tmp.path())).unwrap();
        assert_eq!(sensor.read_cpu_temp_c().await, Some(68));
        assert_eq!(sensor.read_gpu_temp_c().await, None);
    }

    #[test]
    fn no_matching_zone() {
        let tmp = tempfile::tempdir().unwrap();
        zone(tmp.path(), 0, "iwlwifi_1", 40000);
        assert!(ThermalZoneSensor::discover(&SysfsRoot::new(tmp.path())).is_none());
    }
}
