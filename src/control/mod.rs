//! The fan control loop and its lifecycle.
//!
//! One loop owns the sensors, the actuator and [`ControlState`]. Each tick
//! runs sensing, curve evaluation, the hysteresis gate, the battery
//! modifier, smoothing and the actuator write strictly in sequence, and the
//! next tick is not scheduled until the current one finishes.
//!
//! Actuator write order within a run:
//! 1. `set_bios_auto_control(false)` before the first duty write,
//! 2. duty writes in tick order,
//! 3. `set_bios_auto_control(true)` on the way out, faulted or not.

pub mod events;
pub mod shutdown;
pub mod state;

pub use events::{LogSink, StatusSink, TickEvent, TickReason, TickSink};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownHandle};
pub use state::{ControlState, LifecycleState};

use crate::actuator::FanActuator;
use crate::battery::BatteryPolicy;
use crate::curve::{CurveConfig, MAX_DUTY_PERCENT};
use crate::errors::{ActuatorError, Result};
use crate::hysteresis::{self, GateDecision};
use crate::power::{FixedPowerSource, PowerSource};
use crate::sensors::SensorAggregator;
use crate::smoothing;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// Failure handling limits for the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Consecutive transient actuator failures tolerated before faulting.
    pub max_transient_failures: u32,
    /// Consecutive ticks without any temperature before the failsafe duty.
    pub sensor_loss_ticks: u32,
    pub failsafe_duty_percent: u8,
    pub actuator_timeout_ms: u64,
    /// Upper bound on the BIOS-control restore during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_transient_failures: 5,
            sensor_loss_ticks: 3,
            failsafe_duty_percent: 100,
            actuator_timeout_ms: 2000,
            shutdown_grace_ms: 5000,
        }
    }
}

impl SafetyPolicy {
    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// A duty write the current tick decided on.
struct DutyWrite {
    duty: u8,
    /// Where smoothing is heading; differs from `duty` mid-ramp.
    goal: u8,
    /// Temperature to record as the new hysteresis reference, if any.
    observed_temp_c: Option<i32>,
    on_battery: bool,
    now: Instant,
    reason: TickReason,
}

pub struct ControlLoop {
    sensors: SensorAggregator,
    actuator: Box<dyn FanActuator>,
    power: Box<dyn PowerSource>,
    sink: Box<dyn TickSink>,
    config: watch::Receiver<Arc<CurveConfig>>,
    battery: BatteryPolicy,
    safety: SafetyPolicy,
    lifecycle: watch::Sender<LifecycleState>,
    state: ControlState,
    monitoring_only: bool,
    /// Apply on the next tick regardless of the gate.
    forced: Option<TickReason>,
    transient_failures: u32,
    sensor_misses: u32,
    fault: Option<String>,
}

impl ControlLoop {
    pub fn new(
        sensors: SensorAggregator,
        actuator: Box<dyn FanActuator>,
        config: watch::Receiver<Arc<CurveConfig>>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Stopped);
        Self {
            sensors,
            actuator,
            power: Box::new(FixedPowerSource(false)),
            sink: Box::new(LogSink::default()),
            config,
            battery: BatteryPolicy::default(),
            safety: SafetyPolicy::default(),
            lifecycle,
            state: ControlState::new(Instant::now()),
            monitoring_only: false,
            forced: None,
            transient_failures: 0,
            sensor_misses: 0,
            fault: None,
        }
    }

    pub fn with_power_source(mut self, power: Box<dyn PowerSource>) -> Self {
        self.power = power;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn TickSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_battery_policy(mut self, battery: BatteryPolicy) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_safety_policy(mut self, safety: SafetyPolicy) -> Self {
        self.safety = safety;
        self
    }

    /// Start in monitoring-only mode: temperatures are reported, nothing is written
    /// except the final BIOS-control restore.
    pub fn monitoring_only(mut self) -> Self {
        self.monitoring_only = true;
        self
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Run until `shutdown` fires or the loop faults, then hand fan control
    /// back to the firmware. Returns `Stopped` or `Faulted`.
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<LifecycleState> {
        self.set_lifecycle(LifecycleState::Starting);

        let initial = self.snapshot();
        if let Err(e) = initial.validate() {
            error!("Refusing to start fan control: {}", e);
            self.set_lifecycle(LifecycleState::Stopped);
            return Err(e);
        }

        self.state = ControlState::new(Instant::now());
        info!(
            "Starting fan control: {} curve points, poll {}ms, hysteresis {}°C, reapply every {}s",
            initial.curve.points().len(),
            initial.poll_interval_ms,
            initial.hysteresis_c,
            initial.force_reapply_interval_sec
        );

        if !self.monitoring_only {
            self.suppress_bios_control().await;
        }
        if self.fault.is_none() {
            self.set_lifecycle(LifecycleState::Running);
        }

        while self.fault.is_none() {
            let event = tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                event = self.tick() => event,
            };
            self.sink.record(&event);
            if self.fault.is_some() {
                break;
            }

            let poll = self.config.borrow().poll_interval();
            tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                _ = sleep(poll) => {}
            }
        }

        Ok(self.stop().await)
    }

    async fn tick(&mut self) -> TickEvent {
        if self.config.has_changed().unwrap_or(false) {
            self.forced = Some(TickReason::ConfigChanged);
        }
        let config = self.snapshot();

        let sample = self.sensors.sample().await;
        let on_battery = self.power.on_battery();
        let now = Instant::now();
        let mut event = TickEvent::observed(&sample, on_battery, self.state.last_applied_duty);

        let Some(max_temp) = sample.max_temp_c() else {
            return self.on_sensor_loss(event, &config, on_battery, now).await;
        };
        self.sensor_misses = 0;

        let target = self
            .battery
            .apply(config.curve.evaluate(max_temp), on_battery, max_temp);
        event.target_duty = Some(target);

        if self.monitoring_only {
            event.reason = TickReason::MonitoringOnly;
            return event;
        }

        let gate = hysteresis::decide(
            &self.state,
            max_temp,
            config.hysteresis_c,
            config.force_reapply_interval_sec,
            now,
        );
        let (goal, observed, reason) = match gate {
            GateDecision::FirstApplication => (target, Some(max_temp), TickReason::FirstApplication),
            GateDecision::TemperatureDelta => (target, Some(max_temp), TickReason::TemperatureDelta),
            GateDecision::ForcedReapply => (target, Some(max_temp), TickReason::ForcedReapply),
            GateDecision::Hold => {
                if let Some(reason) = self.forced {
                    (target, Some(max_temp), reason)
                } else if on_battery != self.state.on_battery_power {
                    (target, Some(max_temp), TickReason::PowerSourceChanged)
                } else if let Some(goal) = self.state.ramp_goal {
                    (goal, None, TickReason::Ramping)
                } else {
                    return event;
                }
            }
        };

        let duty = if config.smoothing_enabled {
            smoothing::limit(
                self.state.last_applied_duty,
                goal,
                config.max_step_percent_per_tick,
            )
        } else {
            goal
        };

        self.write_duty(
            DutyWrite {
                duty,
                goal,
                observed_temp_c: observed,
                on_battery,
                now,
                reason,
            },
            event,
        )
        .await
    }

    async fn on_sensor_loss(
        &mut self,
        mut event: TickEvent,
        config: &CurveConfig,
        on_battery: bool,
        now: Instant,
    ) -> TickEvent {
        self.sensor_misses = self.sensor_misses.saturating_add(1);
        event.reason = TickReason::SensorsUnavailable;
        if self.monitoring_only || self.sensor_misses < self.safety.sensor_loss_ticks {
            return event;
        }

        let failsafe = self.safety.failsafe_duty_percent.min(MAX_DUTY_PERCENT);
        event.target_duty = Some(failsafe);
        let due = self.state.last_applied_duty != Some(failsafe)
            || now.saturating_duration_since(self.state.last_apply_timestamp)
                >= config.force_reapply_interval();
        if !due {
            return event;
        }
        if self.sensor_misses == self.safety.sensor_loss_ticks.max(1) {
            warn!(
                "No temperature for {} ticks; holding fans at failsafe {}%",
                self.sensor_misses, failsafe
            );
        }

        let event = self
            .write_duty(
                DutyWrite {
                    duty: failsafe,
                    goal: failsafe,
                    observed_temp_c: None,
                    on_battery,
                    now,
                    reason: TickReason::Failsafe,
                },
                event,
            )
            .await;
        if event.applied {
            self.forced = Some(TickReason::SensorsRecovered);
        }
        event
    }

    async fn write_duty(&mut self, write: DutyWrite, mut event: TickEvent) -> TickEvent {
        if !self.state.bios_auto_control_suppressed && !self.suppress_bios_control().await {
            event.reason = self.failure_reason();
            return event;
        }

        let limit = self.safety.actuator_timeout();
        match with_timeout(limit, self.actuator.apply_duty_percent(write.duty)).await {
            Ok(()) => {
                let state = &mut self.state;
                state.last_applied_duty = Some(write.duty);
                if let Some(temp) = write.observed_temp_c {
                    state.last_observed_max_temp_c = temp;
                }
                state.last_apply_timestamp = write.now;
                state.manual_control_active = true;
                state.on_battery_power = write.on_battery;
                state.ramp_goal = (write.duty != write.goal).then_some(write.goal);

                self.transient_failures = 0;
                if write.reason != TickReason::Failsafe {
                    self.forced = None;
                }

                event.applied = true;
                event.applied_duty = Some(write.duty);
                event.reason = write.reason;
            }
            Err(e) => {
                self.handle_actuator_error(e);
                event.reason = self.failure_reason();
            }
        }
        event
    }

    /// Take fan control away from the firmware. Returns whether it worked.
    async fn suppress_bios_control(&mut self) -> bool {
        let limit = self.safety.actuator_timeout();
        match with_timeout(limit, self.actuator.set_bios_auto_control(false)).await {
            Ok(()) => {
                self.state.bios_auto_control_suppressed = true;
                self.transient_failures = 0;
                info!("BIOS fan control suspended ({})", self.actuator.describe());
                true
            }
            Err(e) => {
                self.handle_actuator_error(e);
                false
            }
        }
    }

    fn handle_actuator_error(&mut self, err: ActuatorError) {
        match err {
            ActuatorError::TransientIo(ref message) => {
                self.transient_failures += 1;
                if self.transient_failures > self.safety.max_transient_failures {
                    self.enter_fault(format!(
                        "{} consecutive actuator failures, last: {}",
                        self.transient_failures, message
                    ));
                } else {
                    warn!(
                        "Fan write failed ({}/{}), keeping last duty: {}",
                        self.transient_failures, self.safety.max_transient_failures, message
                    );
                }
            }
            ActuatorError::PermissionDenied(_) => self.enter_fault(err.to_string()),
            ActuatorError::Unsupported(ref message) => {
                warn!(
                    "Fan control not supported here ({}); continuing in monitoring-only mode",
                    message
                );
                self.monitoring_only = true;
            }
        }
    }

    fn enter_fault(&mut self, reason: String) {
        error!("Fan control faulted: {}", reason);
        self.fault = Some(reason);
        self.set_lifecycle(LifecycleState::Faulted);
    }

    fn failure_reason(&self) -> TickReason {
        if self.fault.is_some() {
            TickReason::Faulted
        } else if self.monitoring_only {
            TickReason::MonitoringOnly
        } else {
            TickReason::ActuatorFailed
        }
    }

    /// Restore firmware control, bounded by the shutdown grace period.
    async fn stop(&mut self) -> LifecycleState {
        let faulted = self.fault.is_some();
        if !faulted {
            self.set_lifecycle(LifecycleState::Stopping);
        }

        let grace = self.safety.shutdown_grace();
        match tokio::time::timeout(grace, self.actuator.set_bios_auto_control(true)).await {
            Ok(Ok(())) => info!("BIOS fan control restored"),
            Ok(Err(ActuatorError::Unsupported(message))) => {
                debug!("BIOS fan control restore not supported: {}", message)
            }
            Ok(Err(e)) => error!("Failed to restore BIOS fan control: {}", e),
            Err(_) => error!("Gave up restoring BIOS fan control after {:?}", grace),
        }

        self.state = ControlState::new(Instant::now());
        let final_state = if faulted {
            LifecycleState::Faulted
        } else {
            LifecycleState::Stopped
        };
        self.set_lifecycle(final_state);
        info!("Fan control {}", final_state);
        final_state
    }

    fn snapshot(&mut self) -> Arc<CurveConfig> {
        Arc::clone(&self.config.borrow_and_update())
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        self.lifecycle.send_replace(state);
    }
}

async fn with_timeout<F>(limit: Duration, op: F) -> std::result::Result<(), ActuatorError>
where
    F: Future<Output = std::result::Result<(), ActuatorError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(ActuatorError::TransientIo(format!(
            "no response within {:?}",
            limit
        ))),
    }
}
