//! Temperature sensing across ranked backends

pub mod ec;
pub mod hwmon;
pub mod thermal_zone;

pub use ec::EcSensor;
pub use hwmon::HwmonSensor;
pub use thermal_zone::ThermalZoneSensor;

use crate::ec::EcLayout;
use crate::sysfs::SysfsRoot;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use tokio::time::Instant;

/// Readings outside this window are treated as sensor glitches.
pub const PLAUSIBLE_TEMP_C: RangeInclusive<i32> = -40..=150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSource {
    /// Embedded controller registers.
    Ec,
    /// Kernel hardware-monitor drivers.
    HwMon,
    /// ACPI thermal zones published by the firmware.
    ThermalZone,
}

impl fmt::Display for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ec => "ec",
            Self::HwMon => "hwmon",
            Self::ThermalZone => "thermal_zone",
        };
        f.write_str(name)
    }
}

/// One backend's view of CPU and GPU temperature.
///
/// `None` means the metric is unavailable from this backend right now; the
/// aggregator falls through to the next one.
#[async_trait]
pub trait SensorBackend: Send + Sync {
    fn source(&self) -> SensorSource;

    async fn read_cpu_temp_c(&self) -> Option<i32>;

    async fn read_gpu_temp_c(&self) -> Option<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureSample {
    pub cpu_c: Option<i32>,
    pub gpu_c: Option<i32>,
    /// Backend that supplied the CPU reading, or the GPU reading when the CPU
    /// is unavailable.
    pub source: Option<SensorSource>,
    pub timestamp: Instant,
}

impl TemperatureSample {
    /// The hottest available reading.
    pub fn max_temp_c(&self) -> Option<i32> {
        match (self.cpu_c, self.gpu_c) {
            (Some(cpu), Some(gpu)) => Some(cpu.max(gpu)),
            (cpu, gpu) => cpu.or(gpu),
        }
    }
}

pub struct SensorAggregator {
    backends: Vec<Box<dyn SensorBackend>>,
}

impl SensorAggregator {
    /// `backends` in priority order, most trusted first.
    pub fn new(backends: Vec<Box<dyn SensorBackend>>) -> Self {
        Self { backends }
    }

    /// Probe the machine for each source in `order`, skipping absent ones.
    pub fn discover(sysfs: &SysfsRoot, order: &[SensorSource], ec: &EcLayout) -> Self {
        let mut backends: Vec<Box<dyn SensorBackend>> = Vec::new();
        for source in order {
            let backend = match source {
                SensorSource::Ec => EcSensor::probe(sysfs, ec).map(boxed),
                SensorSource::HwMon => HwmonSensor::discover(sysfs).map(boxed),
                SensorSource::ThermalZone => ThermalZoneSensor::discover(sysfs).map(boxed),
            };
            match backend {
                Some(backend) => {
                    info!("Using {} temperature backend", source);
                    backends.push(backend);
                }
                None => debug!("{} temperature backend not available", source),
            }
        }
        if backends.is_empty() {
            warn!("No temperature backend found; fan control will run in degraded mode");
        }
        Self::new(backends)
    }

    pub fn sources(&self) -> Vec<SensorSource> {
        self.backends.iter().map(|b| b.source()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Read CPU and GPU temperature, each from the first backend that has it.
    pub async fn sample(&self) -> TemperatureSample {
        let mut cpu = None;
        let mut gpu = None;

        for backend in &self.backends {
            if cpu.is_none() {
                cpu = plausible(backend.read_cpu_temp_c().await, backend.source(), "CPU")
                    .map(|t| (t, backend.source()));
            }
            if gpu.is_none() {
                gpu = plausible(backend.read_gpu_temp_c().await, backend.source(), "GPU")
                    .map(|t| (t, backend.source()));
            }
            if cpu.is_some() && gpu.is_some() {
                break;
            }
        }

        TemperatureSample {
            cpu_c: cpu.map(|(t, _)| t),
            gpu_c: gpu.map(|(t, _)| t),
            source: cpu.or(gpu).map(|(_, source)| source),
            timestamp: Instant::now(),
        }
    }
}

fn boxed<B: SensorBackend + 'static>(backend: B) -> Box<dyn SensorBackend> {
    Box::new(backend)
}

fn plausible(reading: Option<i32>, source: SensorSource, metric: &str) -> Option<i32> {
    match reading {
        Some(t) if PLAUSIBLE_TEMP_C.contains(&t) => Some(t),
        Some(t) => {
            debug!("Ignoring implausible {} reading {}°C from {}", metric, t, source);
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedSensor {
        source: SensorSource,
        cpu: Option<i32>,
        gpu: Option<i32>,
        reads: Arc<AtomicUsize>,
    }

    impl FixedSensor {
        fn new(source: SensorSource, cpu: Option<i32>, gpu: Option<i32>) -> Self {
            Self {
                source,
                cpu,
                gpu,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SensorBackend for FixedSensor {
        fn source(&self) -> SensorSource {
            self.source
        }

        async fn read_cpu_temp_c(&self) -> Option<i32> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.cpu
        }

        async fn read_gpu_temp_c(&self) -> Option<i32> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.gpu
        }
    }

    #[tokio::test]
    async fn first_backend_wins_per_metric() {
        let aggregator = SensorAggregator::new(vec![
            Box::new(FixedSensor::new(SensorSource::Ec, Some(65), None)),
            Box::new(FixedSensor::new(SensorSource::HwMon, Some(70), Some(50))),
        ]);

        let sample = aggregator.sample().await;
        assert_eq!(sample.cpu_c, Some(65));
        assert_eq!(sample.gpu_c, Some(50));
        assert_eq!(sample.source, Some(SensorSource::Ec));
        assert_eq!(sample.max_temp_c(), Some(65));
    }

    #[tokio::test]
    async fn stops_once_both_metrics_found() {
        let fallback = FixedSensor::new(SensorSource::ThermalZone, Some(90), Some(90));
        let reads = Arc::clone(&fallback.reads);
        let aggregator = SensorAggregator::new(vec![
            Box::new(FixedSensor::new(SensorSource::Ec, Some(40), Some(45))),
            Box::new(fallback),
        ]);

        let sample = aggregator.sample().await;
        assert_eq!(sample.max_temp_c(), Some(45));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn implausible_readings_fall_through() {
        let aggregator = SensorAggregator::new(vec![
            Box::new(FixedSensor::new(SensorSource::Ec, Some(255), Some(-128))),
            Box::new(FixedSensor::new(SensorSource::HwMon, Some(58), None)),
        ]);

        let sample = aggregator.sample().await;
        assert_eq!(sample.cpu_c, Some(58));
        assert_eq!(sample.gpu_c, None);
        assert_eq!(sample.source, Some(SensorSource::HwMon));
    }

    #[tokio::test]
    async fn all_backends_failing_is_unavailable() {
        let aggregator = SensorAggregator::new(vec![Box::new(FixedSensor::new(
            SensorSource::Ec,
            None,
            None,
        ))]);

        let sample = aggregator.sample().await;
        assert_eq!(sample.max_temp_c(), None);
        assert_eq!(sample.source, None);

        let empty = SensorAggregator::new(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.sample().await.max_temp_c(), None);
    }

    #[tokio::test]
    async fn gpu_only_sample_uses_gpu_source() {
        let aggregator = SensorAggregator::new(vec![Box::new(FixedSensor::new(
            SensorSource::HwMon,
            None,
            Some(72),
        ))]);

        let sample = aggregator.sample().await;
        assert_eq!(sample.max_temp_c(), Some(72));
        assert_eq!(sample.source, Some(SensorSource::HwMon));
    }
}
