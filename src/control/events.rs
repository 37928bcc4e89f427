//! Per-tick observability events and the sinks that consume them

use crate::sensors::{SensorSource, TemperatureSample};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickReason {
    FirstApplication,
    TemperatureDelta,
    ForcedReapply,
    PowerSourceChanged,
    ConfigChanged,
    SensorsRecovered,
    /// Continuing a smoothed ramp toward an earlier goal.
    Ramping,
    /// Inside the hysteresis band; nothing written.
    Hold,
    MonitoringOnly,
    SensorsUnavailable,
    Failsafe,
    ActuatorFailed,
    Faulted,
}

/// What one tick observed and did. Emitted for every completed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub at: DateTime<Local>,
    pub cpu_c: Option<i32>,
    pub gpu_c: Option<i32>,
    pub source: Option<SensorSource>,
    pub max_temp_c: Option<i32>,
    pub target_duty: Option<u8>,
    /// Duty in effect after this tick, whether or not it was written now.
    pub applied_duty: Option<u8>,
    /// A duty write happened during this tick.
    pub applied: bool,
    pub reason: TickReason,
    pub on_battery: bool,
}

impl TickEvent {
    pub(crate) fn observed(
        sample: &TemperatureSample,
        on_battery: bool,
        in_effect: Option<u8>,
    ) -> Self {
        Self {
            at: Local::now(),
            cpu_c: sample.cpu_c,
            gpu_c: sample.gpu_c,
            source: sample.source,
            max_temp_c: sample.max_temp_c(),
            target_duty: None,
            applied_duty: in_effect,
            applied: false,
            reason: TickReason::Hold,
            on_battery,
        }
    }
}

/// Receives every tick event, in tick order.
pub trait TickSink: Send {
    fn record(&mut self, event: &TickEvent);
}

impl TickSink for Vec<Box<dyn TickSink>> {
    fn record(&mut self, event: &TickEvent) {
        for sink in self.iter_mut() {
            sink.record(event);
        }
    }
}

/// Writes tick events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink {
    degraded: bool,
    partial: bool,
}

impl TickSink for LogSink {
    fn record(&mut self, event: &TickEvent) {
        let degraded = event.max_temp_c.is_none();
        if degraded != self.degraded {
            if degraded {
                warn!("No temperature readings available; monitoring degraded");
            } else {
                info!("Temperature readings recovered");
            }
            self.degraded = degraded;
        }

        let partial = !degraded && (event.cpu_c.is_none() || event.gpu_c.is_none());
        if partial && !self.partial {
            info!(
                "Partial temperature data (cpu={:?} gpu={:?}); using the hottest available",
                event.cpu_c, event.gpu_c
            );
        }
        self.partial = partial;

        if event.applied {
            info!(
                "{}°C -> {}% ({:?}, target {:?}%{})",
                event.max_temp_c.map_or_else(|| "--".to_string(), |t| t.to_string()),
                event.applied_duty.unwrap_or_default(),
                event.reason,
                event.target_duty,
                if event.on_battery { ", battery" } else { "" }
            );
        } else {
            debug!(
                "tick: max={:?}°C target={:?}% in effect={:?}% ({:?})",
                event.max_temp_c, event.target_duty, event.applied_duty, event.reason
            );
        }
    }
}

/// Keeps the latest event for status queries.
#[derive(Debug)]
pub struct StatusSink {
    tx: watch::Sender<Option<TickEvent>>,
}

impl StatusSink {
    pub fn new() -> (Self, watch::Receiver<Option<TickEvent>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl TickSink for StatusSink {
    fn record(&mut self, event: &TickEvent) {
        self.tx.send_replace(Some(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn sample(cpu: Option<i32>, gpu: Option<i32>) -> TemperatureSample {
        TemperatureSample {
            cpu_c: cpu,
            gpu_c: gpu,
            source: Some(SensorSource::Ec),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn observed_event_carries_sample() {
        let event = TickEvent::observed(&sample(Some(65), Some(50)), true, Some(40));
        assert_eq!(event.max_temp_c, Some(65));
        assert_eq!(event.applied_duty, Some(40));
        assert!(!event.applied);
        assert!(event.on_battery);
    }

    #[test]
    fn status_sink_keeps_latest() {
        let (mut sink, rx) = StatusSink::new();
        assert!(rx.borrow().is_none());

        let mut event = TickEvent::observed(&sample(Some(70), None), false, None);
        sink.record(&event);
        event.reason = TickReason::ForcedReapply;
        sink.record(&event);

        assert_eq!(rx.borrow().as_ref().map(|e| e.reason), Some(TickReason::ForcedReapply));
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let (a, rx_a) = StatusSink::new();
        let (b, rx_b) = StatusSink::new();
        let mut sinks: Vec<Box<dyn TickSink>> = vec![Box::new(a), Box::new(b), Box::new(LogSink::default())];

        sinks.record(&TickEvent::observed(&sample(None, None), false, None));
        assert!(rx_a.borrow().is_some());
        assert!(rx_b.borrow().is_some());
    }

    #[test]
    fn event_json_round_trips_for_status() {
        let event = TickEvent::observed(&sample(Some(61), Some(49)), false, Some(52));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"hold\""));
        assert!(json.contains("\"source\":\"ec\""));
        let back: TickEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_temp_c, Some(61));
    }
}
