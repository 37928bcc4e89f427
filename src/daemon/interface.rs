//! DBus control surface of the running daemon

use crate::{
    config::{ConfigHandle, DaemonConfig},
    control::{LifecycleState, ShutdownHandle, TickEvent},
    curve::{Curve, CurveConfig, CurvePoint},
    errors::{zbus_error_from_display, Result},
    sensors::SensorSource,
};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use zbus::{dbus_interface, SignalContext};

/// Snapshot returned by `GetStatus`, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub lifecycle: LifecycleState,
    pub actuator: String,
    pub sources: Vec<SensorSource>,
    pub config: CurveConfig,
    pub latest: Option<TickEvent>,
}

pub struct FanDaemon {
    handle: ConfigHandle,
    status: watch::Receiver<Option<TickEvent>>,
    lifecycle: watch::Receiver<LifecycleState>,
    shutdown: ShutdownHandle,
    actuator: String,
    sources: Vec<SensorSource>,
    /// Persisted copy; only `curve` changes at runtime.
    persisted: Mutex<(DaemonConfig, PathBuf)>,
}

impl FanDaemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: ConfigHandle,
        status: watch::Receiver<Option<TickEvent>>,
        lifecycle: watch::Receiver<LifecycleState>,
        shutdown: ShutdownHandle,
        actuator: String,
        sources: Vec<SensorSource>,
        config: DaemonConfig,
        config_path: PathBuf,
    ) -> Self {
        Self {
            handle,
            status,
            lifecycle,
            shutdown,
            actuator,
            sources,
            persisted: Mutex::new((config, config_path)),
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            lifecycle: *self.lifecycle.borrow(),
            actuator: self.actuator.clone(),
            sources: self.sources.clone(),
            config: (*self.handle.current()).clone(),
            latest: self.status.borrow().clone(),
        }
    }

    /// Persist a snapshot the config handle has already accepted and
    /// published to the loop.
    async fn commit(&self, accepted: Result<Arc<CurveConfig>>) -> Result<Arc<CurveConfig>> {
        let accepted = accepted?;

        let mut persisted = self.persisted.lock().await;
        let (daemon_config, path) = &mut *persisted;
        daemon_config.curve = (*accepted).clone();
        if let Err(e) = daemon_config.save_to_file(path) {
            // The new curve is already live; only persistence failed.
            error!("Failed to save config to {}: {}", path.display(), e);
            return Err(e);
        }
        info!("Configuration saved to: {}", path.display());
        Ok(accepted)
    }

    async fn commit_and_notify(
        &self,
        accepted: Result<Arc<CurveConfig>>,
        ctxt: &SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let accepted = self.commit(accepted).await.map_err(zbus_error_from_display)?;
        if let Err(e) = Self::curve_changed(ctxt, accepted.curve.points().to_vec()).await {
            error!("Failed to emit CurveChanged: {}", e);
        }
        Ok(())
    }
}

#[dbus_interface(name = "com.omenfan.FanDaemon")]
impl FanDaemon {
    /// Latest tick, lifecycle state and active configuration as JSON
    async fn get_status(&self) -> zbus::fdo::Result<String> {
        debug!("Getting status");
        serde_json::to_string(&self.status_report()).map_err(zbus_error_from_display)
    }

    async fn get_curve(&self) -> Vec<CurvePoint> {
        self.handle.current().curve.points().to_vec()
    }

    async fn set_curve(
        &self,
        points: Vec<CurvePoint>,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        debug!("Setting curve with {} points", points.len());
        let curve = Curve::new(points).map_err(zbus_error_from_display)?;
        self.commit_and_notify(self.handle.set_curve(curve), &ctxt).await?;
        info!("Fan curve replaced");
        Ok(())
    }

    async fn set_options(
        &self,
        hysteresis_c: u32,
        smoothing_enabled: bool,
        max_step_percent_per_tick: u8,
        force_reapply_interval_sec: u64,
        poll_interval_ms: u64,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let config = CurveConfig {
            hysteresis_c,
            smoothing_enabled,
            max_step_percent_per_tick,
            force_reapply_interval_sec,
            poll_interval_ms,
            ..(*self.handle.current()).clone()
        };
        self.commit_and_notify(self.handle.replace(config), &ctxt).await?;
        info!(
            "Options updated: hysteresis {}°C, smoothing {} ({}%/tick), reapply {}s, poll {}ms",
            hysteresis_c,
            smoothing_enabled,
            max_step_percent_per_tick,
            force_reapply_interval_sec,
            poll_interval_ms
        );
        Ok(())
    }

    async fn list_presets(&self) -> Vec<String> {
        Curve::preset_names().iter().map(|s| s.to_string()).collect()
    }

    async fn apply_preset(
        &self,
        name: &str,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        self.commit_and_notify(self.handle.apply_preset(name), &ctxt).await?;
        info!("Fan curve set to preset: {}", name);
        Ok(())
    }

    /// Restore BIOS fan control and exit the daemon
    async fn stop(&self) {
        info!("Stop requested over DBus");
        self.shutdown.trigger();
    }

    #[dbus_interface(signal)]
    async fn curve_changed(ctxt: &SignalContext<'_>, points: Vec<CurvePoint>) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::shutdown_channel;

    fn daemon(dir: &std::path::Path) -> (FanDaemon, crate::control::Shutdown) {
        let (handle, _rx) = ConfigHandle::new(CurveConfig::default()).unwrap();
        let (_status_tx, status) = watch::channel(None);
        let (_life_tx, lifecycle) = watch::channel(LifecycleState::Running);
        let (trigger, shutdown) = shutdown_channel();
        let daemon = FanDaemon::new(
            handle,
            status,
            lifecycle,
            trigger,
            "ec".to_string(),
            vec![SensorSource::Ec],
            DaemonConfig::default(),
            dir.join("config.json"),
        );
        (daemon, shutdown)
    }

    #[tokio::test]
    async fn accepted_curve_is_live_and_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, _shutdown) = daemon(tmp.path());

        daemon
            .commit(daemon.handle.apply_preset("silent"))
            .await
            .unwrap();

        assert_eq!(daemon.handle.current().curve, Curve::silent());
        let saved = DaemonConfig::load_from_file(&tmp.path().join("config.json")).unwrap();
        assert_eq!(saved.curve.curve, Curve::silent());
        assert_eq!(saved.curve.poll_interval_ms, CurveConfig::default().poll_interval_ms);
    }

    #[tokio::test]
    async fn set_curve_keeps_options() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, _shutdown) = daemon(tmp.path());
        let options = CurveConfig {
            hysteresis_c: 5,
            ..CurveConfig::default()
        };
        daemon.commit(daemon.handle.replace(options)).await.unwrap();

        daemon
            .commit(daemon.handle.set_curve(Curve::performance()))
            .await
            .unwrap();

        let saved = DaemonConfig::load_from_file(&tmp.path().join("config.json")).unwrap();
        assert_eq!(saved.curve.curve, Curve::performance());
        assert_eq!(saved.curve.hysteresis_c, 5);
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, _shutdown) = daemon(tmp.path());

        let err = daemon
            .commit(daemon.handle.apply_preset("turbo"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown preset"));
        assert_eq!(*daemon.handle.current(), CurveConfig::default());
        assert!(!tmp.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn rejected_options_leave_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, _shutdown) = daemon(tmp.path());

        let bad = CurveConfig {
            poll_interval_ms: 0,
            ..CurveConfig::default()
        };
        assert!(daemon.commit(daemon.handle.replace(bad)).await.is_err());
        assert_eq!(*daemon.handle.current(), CurveConfig::default());
        assert!(!tmp.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn status_report_is_json() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, _shutdown) = daemon(tmp.path());

        let json = daemon.get_status().await.unwrap();
        let report: StatusReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report.lifecycle, LifecycleState::Running);
        assert_eq!(report.actuator, "ec");
        assert!(report.latest.is_none());
    }

    #[tokio::test]
    async fn stop_triggers_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let (daemon, shutdown) = daemon(tmp.path());
        daemon.stop().await;
        assert!(shutdown.is_requested());
    }
}
