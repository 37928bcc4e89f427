//! Fan curves and the curve configuration consumed by the control loop

use crate::errors::{FanControlError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zvariant::Type;

/// Highest duty a curve point may request.
pub const MAX_DUTY_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct CurvePoint {
    pub temp_c: i32,
    pub duty_percent: u8,
}

impl CurvePoint {
    pub fn new(temp_c: i32, duty_percent: u8) -> Self {
        Self {
            temp_c,
            duty_percent,
        }
    }
}

/// Ordered temperature → duty mapping.
///
/// A `Curve` always has at least one point, strictly increasing temperatures,
/// and duties within 0..=100. Construction rejects anything else instead of
/// repairing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CurvePoint>", into = "Vec<CurvePoint>")]
pub struct Curve {
    points: Vec<CurvePoint>,
}

impl Curve {
    pub fn new(points: Vec<CurvePoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(FanControlError::InvalidCurveConfig(
                "curve must have at least one point".to_string(),
            ));
        }
        for (i, point) in points.iter().enumerate() {
            if point.duty_percent > MAX_DUTY_PERCENT {
                return Err(FanControlError::InvalidCurveConfig(format!(
                    "point {} ({}°C) requests {}% duty, maximum is {}%",
                    i, point.temp_c, point.duty_percent, MAX_DUTY_PERCENT
                )));
            }
            if i > 0 && point.temp_c <= points[i - 1].temp_c {
                return Err(FanControlError::InvalidCurveConfig(format!(
                    "temperatures must be strictly increasing (point {}: {}°C after {}°C)",
                    i,
                    point.temp_c,
                    points[i - 1].temp_c
                )));
            }
        }
        Ok(Self { points })
    }

    /// Build a curve from `(temp, duty)` pairs.
    pub fn from_pairs(pairs: &[(i32, u8)]) -> Result<Self> {
        Self::new(
            pairs
                .iter()
                .map(|&(temp, duty)| CurvePoint::new(temp, duty))
                .collect(),
        )
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Duty percent for `max_temp_c`.
    ///
    /// Clamps to the boundary points outside the curve and interpolates
    /// linearly between the bracketing pair inside it, truncating toward zero.
    pub fn evaluate(&self, max_temp_c: i32) -> u8 {
        // `new` guarantees at least one point.
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if max_temp_c <= first.temp_c {
            return first.duty_percent;
        }
        if max_temp_c >= last.temp_c {
            return last.duty_percent;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if max_temp_c >= lo.temp_c && max_temp_c <= hi.temp_c {
                return interpolate(lo, hi, max_temp_c);
            }
        }

        last.duty_percent
    }

    pub fn silent() -> Self {
        Self {
            points: points(&[(45, 0), (55, 20), (70, 40), (80, 65), (90, 100)]),
        }
    }

    pub fn balanced() -> Self {
        Self {
            points: points(&[(40, 20), (60, 50), (80, 85), (90, 100)]),
        }
    }

    pub fn performance() -> Self {
        Self {
            points: points(&[(35, 30), (50, 50), (65, 75), (75, 100)]),
        }
    }

    pub fn max() -> Self {
        Self {
            points: points(&[(0, 100)]),
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["silent", "balanced", "performance", "max"]
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "silent" => Some(Self::silent()),
            "balanced" => Some(Self::balanced()),
            "performance" => Some(Self::performance()),
            "max" => Some(Self::max()),
            _ => None,
        }
    }
}

fn points(pairs: &[(i32, u8)]) -> Vec<CurvePoint> {
    pairs
        .iter()
        .map(|&(temp, duty)| CurvePoint::new(temp, duty))
        .collect()
}

fn interpolate(lo: CurvePoint, hi: CurvePoint, temp_c: i32) -> u8 {
    let (t1, t2) = (i64::from(lo.temp_c), i64::from(hi.temp_c));
    let (d1, d2) = (i64::from(lo.duty_percent), i64::from(hi.duty_percent));
    let t = i64::from(temp_c);
    // Divide once so the whole result truncates, not just the delta.
    let duty = (d1 * (t2 - t1) + (d2 - d1) * (t - t1)) / (t2 - t1);
    duty.clamp(0, i64::from(MAX_DUTY_PERCENT)) as u8
}

impl TryFrom<Vec<CurvePoint>> for Curve {
    type Error = FanControlError;

    fn try_from(points: Vec<CurvePoint>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<Curve> for Vec<CurvePoint> {
    fn from(curve: Curve) -> Self {
        curve.points
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Everything the control loop needs to turn a temperature into a duty.
///
/// Treated as an immutable snapshot: edits build a new value and swap it in
/// through [`crate::config::ConfigHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    pub curve: Curve,
    pub hysteresis_c: u32,
    pub smoothing_enabled: bool,
    pub max_step_percent_per_tick: u8,
    pub force_reapply_interval_sec: u64,
    pub poll_interval_ms: u64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            curve: Curve::default(),
            hysteresis_c: 3,
            smoothing_enabled: true,
            max_step_percent_per_tick: 10,
            force_reapply_interval_sec: 60,
            poll_interval_ms: 2000,
        }
    }
}

impl CurveConfig {
    pub fn validate(&self) -> Result<()> {
        // Re-run the curve checks in case the value was assembled by hand.
        Curve::new(self.curve.points().to_vec())?;

        if self.max_step_percent_per_tick == 0 {
            return Err(FanControlError::InvalidCurveConfig(
                "max_step_percent_per_tick must be greater than zero".to_string(),
            ));
        }
        if self.force_reapply_interval_sec == 0 {
            return Err(FanControlError::InvalidCurveConfig(
                "force_reapply_interval_sec must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(FanControlError::InvalidCurveConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_curve(&self, curve: Curve) -> Self {
        Self {
            curve,
            ..self.clone()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn force_reapply_interval(&self) -> Duration {
        Duration::from_secs(self.force_reapply_interval_sec)
    }
}
