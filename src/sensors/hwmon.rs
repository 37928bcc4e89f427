use super::{SensorBackend, SensorSource};
use crate::sysfs::{self, SysfsRoot};
use async_trait::async_trait;
use log::{debug, info, warn};

const HWMON_DIR: &str = "sys/class/hwmon";

/// CPU manufacturer types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuManufacturer {
    Intel,
    Amd,
    Unknown,
}

impl CpuManufacturer {
    /// Detect the vendor from `/proc/cpuinfo`.
    pub fn detect(sysfs: &SysfsRoot) -> Self {
        let cpuinfo = match sysfs.read_optional("proc/cpuinfo") {
            Ok(Some(text)) => text,
            _ => return Self::Unknown,
        };
        let vendor = cpuinfo
            .lines()
            .find(|line| line.starts_with("vendor_id"))
            .and_then(|line| line.split(':').nth(1))
            .map(str::trim);

        match vendor {
            Some("GenuineIntel") => Self::Intel,
            Some("AuthenticAMD") => Self::Amd,
            other => {
                warn!("Unknown CPU vendor: {:?}", other);
                Self::Unknown
            }
        }
    }

    fn driver_names(self) -> &'static [&'static str] {
        match self {
            Self::Intel => &["coretemp"],
            Self::Amd => &["k10temp", "zenpower"],
            Self::Unknown => &["coretemp", "k10temp", "zenpower"],
        }
    }
}

const CPU_LABELS: &[&str] = &["Package id 0", "Tctl", "Tdie", "Core 0"];
const GPU_DRIVERS: &[&str] = &["amdgpu", "nouveau", "radeon"];
const GPU_LABELS: &[&str] = &["edge", "junction"];

/// Temperatures from kernel hwmon drivers, in millidegrees.
pub struct HwmonSensor {
    sysfs: SysfsRoot,
    cpu_input: Option<String>,
    gpu_input: Option<String>,
}

impl HwmonSensor {
    /// Locate CPU and GPU temperature inputs. `None` when neither exists.
    pub fn discover(sysfs: &SysfsRoot) -> Option<Self> {
        let manufacturer = CpuManufacturer::detect(sysfs);
        debug!("Detected CPU manufacturer: {:?}", manufacturer);

        let devices = sysfs.list_dir(HWMON_DIR).unwrap_or_default();
        let named: Vec<(String, String)> = devices
            .into_iter()
            .filter_map(|dev| {
                let name = sysfs
                    .read_optional(format!("{}/{}/name", HWMON_DIR, dev))
                    .ok()
                    .flatten()?;
                Some((dev, name))
            })
            .collect();

        let find = |drivers: &[&str], labels: &[&str]| {
            drivers.iter().find_map(|driver| {
                named
                    .iter()
                    .filter(|(_, name)| name == driver)
                    .find_map(|(dev, _)| find_temp_input(sysfs, dev, labels))
            })
        };

        let cpu_input = find(manufacturer.driver_names(), CPU_LABELS);
        let gpu_input = find(GPU_DRIVERS, GPU_LABELS);

        if cpu_input.is_none() && gpu_input.is_none() {
            return None;
        }
        info!(
            "hwmon temperature inputs: cpu={:?} gpu={:?}",
            cpu_input, gpu_input
        );
        Some(Self {
            sysfs: sysfs.clone(),
            cpu_input,
            gpu_input,
        })
    }

    async fn read_input(&self, input: Option<&str>) -> Option<i32> {
        let input = input?.to_string();
        let root = self.sysfs.clone();
        match sysfs::unblock(move || root.read_parse::<i32>(input)).await {
            Ok(millidegrees) => Some(millidegrees / 1000),
            Err(e) => {
                debug!("hwmon read failed: {}", e);
                None
            }
        }
    }
}

/// Pick the `tempN_input` whose label matches, else the first input.
fn find_temp_input(sysfs: &SysfsRoot, dev: &str, labels: &[&str]) -> Option<String> {
    let dir = format!("{}/{}", HWMON_DIR, dev);
    let inputs: Vec<String> = sysfs
        .list_dir(&dir)
        .ok()?
        .into_iter()
        .filter(|f| f.starts_with("temp") && f.ends_with("_input"))
        .collect();

    let labelled = inputs.iter().find(|input| {
        let label_file = input.replace("_input", "_label");
        match sysfs.read_optional(format!("{}/{}", dir, label_file)) {
            Ok(Some(label)) => labels.iter().any(|want| label.contains(want)),
            _ => false,
        }
    });

    labelled
        .or_else(|| inputs.first())
        .map(|input| format!("{}/{}", dir, input))
}

#[async_trait]
impl SensorBackend for HwmonSensor {
    fn source(&self) -> SensorSource {
        SensorSource::HwMon
    }

    async fn read_cpu_temp_c(&self) -> Option<i32> {
        self.read_input(self.cpu_input.as_deref()).await
    }

    async fn read_gpu_temp_c(&self) -> Option<i32> {
        self.read_input(self.gpu_input.as_deref()).await
    }
}
