//! Command line client for the fan control daemon

use crate::{
    args::{Commands, CurveCommands},
    config::DaemonConfig,
    curve::{Curve, CurvePoint},
    daemon::StatusReport,
    errors::{FanControlError, Result},
    power::{PowerSource, SysfsPowerSource},
    sensors::SensorAggregator,
};
use log::debug;
use std::path::Path;
use zbus::{dbus_proxy, Connection};

#[dbus_proxy(
    interface = "com.omenfan.FanDaemon",
    default_service = "com.omenfan.FanDaemon",
    default_path = "/com/omenfan/FanDaemon"
)]
trait FanDaemon {
    fn get_status(&self) -> zbus::Result<String>;

    fn get_curve(&self) -> zbus::Result<Vec<CurvePoint>>;

    fn set_curve(&self, points: &[CurvePoint]) -> zbus::Result<()>;

    fn set_options(
        &self,
        hysteresis_c: u32,
        smoothing_enabled: bool,
        max_step_percent_per_tick: u8,
        force_reapply_interval_sec: u64,
        poll_interval_ms: u64,
    ) -> zbus::Result<()>;

    fn list_presets(&self) -> zbus::Result<Vec<String>>;

    fn apply_preset(&self, name: &str) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;
}

/// Option overrides from `omen-fan options`; `None` keeps the daemon's value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionChanges {
    pub hysteresis: Option<u32>,
    pub smoothing: Option<bool>,
    pub max_step: Option<u8>,
    pub reapply: Option<u64>,
    pub poll: Option<u64>,
}

/// Client for communicating with the fan control daemon
pub struct FanControlClient {
    proxy: FanDaemonProxy<'static>,
}

impl FanControlClient {
    pub async fn new() -> Result<Self> {
        let connection = Connection::system().await?;
        let proxy = FanDaemonProxy::new(&connection).await?;
        Ok(Self { proxy })
    }

    /// Handle the commands that need the running daemon
    pub async fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Status => self.status().await,
            Commands::Curve { command } => self.handle_curve_command(command).await,
            Commands::Options {
                hysteresis,
                smoothing,
                max_step,
                reapply,
                poll,
            } => {
                self.set_options(OptionChanges {
                    hysteresis,
                    smoothing,
                    max_step,
                    reapply,
                    poll,
                })
                .await
            }
            Commands::Stop => {
                self.proxy.stop().await.map_err(daemon_error)?;
                println!("Stop requested; BIOS fan control will be restored");
                Ok(())
            }
            other => Err(FanControlError::Config(format!(
                "{:?} does not talk to the daemon",
                other
            ))),
        }
    }

    async fn handle_curve_command(&self, command: CurveCommands) -> Result<()> {
        match command {
            CurveCommands::Show => {
                let points = self.proxy.get_curve().await.map_err(daemon_error)?;
                print_curve(&points);
            }
            CurveCommands::Set { points } => {
                let curve = Curve::from_pairs(&points)?;
                debug!("Setting curve: {:?}", curve);
                self.proxy
                    .set_curve(curve.points())
                    .await
                    .map_err(daemon_error)?;
                println!("Fan curve updated");
            }
            CurveCommands::Preset { name } => {
                self.proxy.apply_preset(&name).await.map_err(daemon_error)?;
                println!("Fan curve set to preset: {}", name);
            }
            CurveCommands::Presets => {
                println!("Available presets:");
                for name in self.proxy.list_presets().await.map_err(daemon_error)? {
                    println!("  - {}", name);
                }
            }
        }
        Ok(())
    }

    async fn status_report(&self) -> Result<StatusReport> {
        let json = self.proxy.get_status().await.map_err(daemon_error)?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn status(&self) -> Result<()> {
        let report = self.status_report().await?;
        println!("State:    {}", report.lifecycle);
        println!("Actuator: {}", report.actuator);
        let sources: Vec<String> = report.sources.iter().map(|s| s.to_string()).collect();
        println!("Sensors:  {}", sources.join(", "));
        match report.latest {
            Some(tick) => {
                println!(
                    "Temp:     cpu {} / gpu {} (max {})",
                    celsius(tick.cpu_c),
                    celsius(tick.gpu_c),
                    celsius(tick.max_temp_c)
                );
                println!(
                    "Duty:     {} (target {})",
                    percent(tick.applied_duty),
                    percent(tick.target_duty)
                );
                println!("Power:    {}", if tick.on_battery { "battery" } else { "AC" });
                println!("Last:     {:?} at {}", tick.reason, tick.at.format("%H:%M:%S"));
            }
            None => println!("No tick completed yet"),
        }
        Ok(())
    }

    async fn set_options(&self, changes: OptionChanges) -> Result<()> {
        let current = self.status_report().await?.config;
        self.proxy
            .set_options(
                changes.hysteresis.unwrap_or(current.hysteresis_c),
                changes.smoothing.unwrap_or(current.smoothing_enabled),
                changes.max_step.unwrap_or(current.max_step_percent_per_tick),
                changes.reapply.unwrap_or(current.force_reapply_interval_sec),
                changes.poll.unwrap_or(current.poll_interval_ms),
            )
            .await
            .map_err(daemon_error)?;
        println!("Options updated");
        Ok(())
    }
}

/// `ServiceUnknown` means nobody owns the bus name.
fn daemon_error(err: zbus::Error) -> FanControlError {
    const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    match &err {
        zbus::Error::MethodError(name, _, _) if name.as_str() == SERVICE_UNKNOWN => {
            FanControlError::DaemonNotRunning
        }
        zbus::Error::FDO(fdo) if matches!(**fdo, zbus::fdo::Error::ServiceUnknown(_)) => {
            FanControlError::DaemonNotRunning
        }
        _ => FanControlError::DBus(err),
    }
}

fn celsius(value: Option<i32>) -> String {
    value.map_or_else(|| "--".to_string(), |t| format!("{}°C", t))
}

fn percent(value: Option<u8>) -> String {
    value.map_or_else(|| "--".to_string(), |d| format!("{}%", d))
}

fn print_curve(points: &[CurvePoint]) {
    println!("Temp (°C)  Duty (%)");
    for point in points {
        println!("{:>9}  {:>8}", point.temp_c, point.duty_percent);
    }
}

/// Config for the offline commands: the file if present, else the defaults.
pub fn load_local_config(path: &Path) -> Result<DaemonConfig> {
    if path.exists() {
        DaemonConfig::load_from_file(path)
    } else {
        Ok(DaemonConfig::default())
    }
}

/// Evaluate the configured curve and battery policy for `temp_c`.
pub fn preview(config: &DaemonConfig, temp_c: i32, on_battery: bool) -> u8 {
    let curve_duty = config.curve.curve.evaluate(temp_c);
    config.battery.apply(curve_duty, on_battery, temp_c)
}

/// Print one aggregated sample from the local sensors and the power state.
pub async fn print_sensors(config: &DaemonConfig) -> Result<()> {
    let sysfs = config.hardware.sysfs();
    let sensors =
        SensorAggregator::discover(&sysfs, &config.hardware.sensor_order, &config.hardware.ec);
    let sample = sensors.sample().await;
    let power = SysfsPowerSource::new(sysfs);

    println!(
        "CPU: {}  GPU: {}  max: {}  source: {}",
        celsius(sample.cpu_c),
        celsius(sample.gpu_c),
        celsius(sample.max_temp_c()),
        sample.source.map_or_else(|| "none".to_string(), |s| s.to_string())
    );
    println!(
        "Power: {}",
        if power.on_battery() { "battery" } else { "AC" }
    );
    Ok(())
}
