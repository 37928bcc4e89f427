//! Daemon wiring: configuration, hardware discovery, DBus and the control loop

mod interface;

pub use interface::{FanDaemon, StatusReport};

use crate::{
    actuator::{self, FanActuator, UnsupportedActuator},
    config::{ConfigHandle, DaemonConfig},
    control::{
        shutdown_channel, ControlLoop, LifecycleState, LogSink, ShutdownHandle, StatusSink,
        TickSink,
    },
    errors::Result,
    monitor::CsvSink,
    power::SysfsPowerSource,
    sensors::SensorAggregator,
    DBUS_OBJECT_PATH, DBUS_SERVICE_NAME,
};
use log::{info, warn};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use zbus::{Connection, ConnectionBuilder};

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub config_path: Option<PathBuf>,
    /// Never write to the fans.
    pub monitor_only: bool,
    pub csv: Option<PathBuf>,
}

/// Run the daemon until a signal or `Stop` arrives. Returns the loop's final
/// state so the caller can exit non-zero on `Faulted`.
pub async fn run(options: DaemonOptions) -> Result<LifecycleState> {
    info!("Starting fan control daemon");

    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(DaemonConfig::default_path);
    let config = DaemonConfig::load_or_create(&config_path)?;

    let sysfs = config.hardware.sysfs();
    let sensors =
        SensorAggregator::discover(&sysfs, &config.hardware.sensor_order, &config.hardware.ec);
    let sources = sensors.sources();

    let actuator: Box<dyn FanActuator> = if options.monitor_only {
        info!("Monitor-only mode: fans stay under BIOS control");
        Box::new(UnsupportedActuator)
    } else {
        actuator::select(&sysfs, config.hardware.actuator, &config.hardware.ec)
    };
    let actuator_name = actuator.describe();

    let (handle, config_rx) = ConfigHandle::new(config.curve.clone())?;
    let (status_sink, status_rx) = StatusSink::new();
    let mut sinks: Vec<Box<dyn TickSink>> = vec![Box::new(LogSink::default()), Box::new(status_sink)];
    if let Some(path) = &options.csv {
        sinks.push(Box::new(CsvSink::create(path)?));
    }

    let (shutdown_handle, shutdown) = shutdown_channel();
    watch_signals(shutdown_handle.clone())?;

    let mut control = ControlLoop::new(sensors, actuator, config_rx)
        .with_power_source(Box::new(SysfsPowerSource::new(sysfs)))
        .with_sink(Box::new(sinks))
        .with_battery_policy(config.battery)
        .with_safety_policy(config.safety);
    if options.monitor_only {
        control = control.monitoring_only();
    }

    let interface = FanDaemon::new(
        handle,
        status_rx,
        control.subscribe_lifecycle(),
        shutdown_handle,
        actuator_name,
        sources,
        config,
        config_path,
    );
    let _connection = match serve(interface).await {
        Ok(connection) => {
            info!("Daemon listening on DBus as {}", DBUS_SERVICE_NAME);
            Some(connection)
        }
        Err(e) => {
            warn!("DBus unavailable, running without a control interface: {}", e);
            None
        }
    };

    control.run(shutdown).await
}

async fn serve(interface: FanDaemon) -> zbus::Result<Connection> {
    ConnectionBuilder::system()?
        .name(DBUS_SERVICE_NAME)?
        .serve_at(DBUS_OBJECT_PATH, interface)?
        .build()
        .await
}

/// Trigger `handle` on SIGINT, SIGHUP or SIGTERM.
fn watch_signals(handle: ShutdownHandle) -> Result<()> {
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        let sig = tokio::select! {
            _ = int.recv() => "SIGINT",
            _ = hup.recv() => "SIGHUP",
            _ = term.recv() => "SIGTERM",
        };
        info!("caught signal: {}", sig);
        handle.trigger();
    });
    Ok(())
}
