//! Per-tick duty step limiter

/// Move from `previous` toward `target` by at most `max_step_percent`.
///
/// The first write of a run (`previous == None`) goes straight to the target.
pub fn limit(previous: Option<u8>, target: u8, max_step_percent: u8) -> u8 {
    let Some(previous) = previous else {
        return target;
    };
    let step = i16::from(max_step_percent);
    let delta = (i16::from(target) - i16::from(previous)).clamp(-step, step);
    (i16::from(previous) + delta) as u8
}
