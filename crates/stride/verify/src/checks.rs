//! Individual fraud checks.
//!
//! Each check is a pure function over [`CheckInput`]. The engine runs all of
//! them and aggregates: one failed check means fraud, any flagged check means
//! the session goes to manual review.

use crate::constants::{
    goal_targets_for, thresholds_for, MAX_GPS_ACCURACY_METERS, MAX_TIMESTAMP_GAP_SECONDS,
    MIN_CORRELATION_ACCEL_RMS, MIN_GPS_DISPLACEMENT_METERS, MIN_GPS_SAMPLES_PER_MIN,
    MIN_MOTION_SAMPLES_FOR_CHECK, MIN_MOTION_SAMPLES_PER_MIN, MIN_SESSION_DURATION_SECONDS,
    TELEPORTATION_FAIL_RATIO, TIMESTAMP_GAP_FAIL_RATIO,
};
use crate::util::{accel_magnitude, haversine_meters, mps_to_mph, rms};
use stride_types::{ActivityType, GpsSample, MotionSample, PedometerSample, SessionGoal};

/// Verdict from a single check. `flagged` means suspicious but not
/// conclusive fraud.
#[derive(Clone, Debug)]
pub struct CheckResult {
    pub passed: bool,
    pub flagged: bool,
    pub note: Option<String>,
}

impl CheckResult {
    fn pass() -> Self {
        Self { passed: true, flagged: false, note: None }
    }

    fn fail(note: String) -> Self {
        Self { passed: false, flagged: false, note: Some(note) }
    }

    fn flag(note: String) -> Self {
        Self { passed: true, flagged: true, note: Some(note) }
    }
}

/// Input bundle shared by all checks. Sample slices are pre-sorted by
/// capture time, ascending.
pub struct CheckInput<'a> {
    pub activity: ActivityType,
    pub goal: SessionGoal,
    pub gps: &'a [GpsSample],
    pub motion: &'a [MotionSample],
    pub pedometer: &'a [PedometerSample],
    pub duration_secs: f64,
    /// Freshly computed achievement (steps or miles), not the stored value.
    pub actual_value: f64,
}

/// Enough GPS and motion samples relative to session duration. Too few means
/// the app was backgrounded or the data was fabricated.
pub fn check_minimum_data(input: &CheckInput<'_>) -> CheckResult {
    if input.duration_secs < MIN_SESSION_DURATION_SECONDS {
        return CheckResult::fail("session too short (< 1 minute)".to_string());
    }

    let mins = input.duration_secs / 60.0;
    let need_gps = (mins * MIN_GPS_SAMPLES_PER_MIN).round() as usize;
    let need_motion = (mins * MIN_MOTION_SAMPLES_PER_MIN).round() as usize;

    let has_gps = input.gps.len() >= need_gps;
    let has_motion = input.motion.len() >= need_motion;

    if !has_gps && !has_motion {
        return CheckResult::fail(format!(
            "insufficient data: {} gps (need {need_gps}), {} motion (need {need_motion})",
            input.gps.len(),
            input.motion.len()
        ));
    }

    if !has_gps || !has_motion {
        return CheckResult::flag(format!(
            "low data density: {} gps, {} motion for {:.0} min session",
            input.gps.len(),
            input.motion.len(),
            mins.round()
        ));
    }

    CheckResult::pass()
}

/// Impossible speed between consecutive GPS fixes. A high ratio of violating
/// segments is fraud; a handful is likely GPS drift.
pub fn check_gps_teleportation(input: &CheckInput<'_>) -> CheckResult {
    if input.gps.len() < 2 {
        return CheckResult::flag("not enough gps points to check teleportation".to_string());
    }

    let limit = thresholds_for(input.activity).teleport_speed_mph;
    let mut violations = 0usize;

    for pair in input.gps.windows(2) {
        let dt_sec = (pair[1].captured_at - pair[0].captured_at).num_milliseconds() as f64 / 1000.0;
        if dt_sec <= 0.0 {
            continue;
        }
        let dist = haversine_meters(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
        if mps_to_mph(dist / dt_sec) > limit {
            violations += 1;
        }
    }

    let segments = input.gps.len() - 1;
    let ratio = violations as f64 / segments as f64;

    if ratio > TELEPORTATION_FAIL_RATIO {
        return CheckResult::fail(format!(
            "gps teleportation: {violations}/{segments} segments exceed {limit} mph ({:.1}%)",
            ratio * 100.0
        ));
    }

    if violations > 0 {
        return CheckResult::flag(format!(
            "{violations} gps segments exceeded speed limit (likely gps drift)"
        ));
    }

    CheckResult::pass()
}

/// Average GPS speed within the plausible range for the activity. Catches
/// people driving the route or sitting still with a spoofer.
pub fn check_speed_range(input: &CheckInput<'_>) -> CheckResult {
    let accurate: Vec<&GpsSample> = input
        .gps
        .iter()
        .filter(|s| s.horiz_acc.map_or(true, |acc| acc <= MAX_GPS_ACCURACY_METERS))
        .collect();

    if accurate.len() < 2 {
        return CheckResult::flag("not enough accurate gps points for speed check".to_string());
    }

    let mut total_dist = 0.0;
    for pair in accurate.windows(2) {
        total_dist += haversine_meters(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
    }

    let first = accurate[0];
    let last = accurate[accurate.len() - 1];
    let total_time_sec =
        (last.captured_at - first.captured_at).num_milliseconds() as f64 / 1000.0;

    if total_time_sec <= 0.0 {
        return CheckResult::flag("gps time span is zero".to_string());
    }

    let avg_mph = mps_to_mph(total_dist / total_time_sec);
    let max_mph = thresholds_for(input.activity).max_avg_speed_mph;

    if avg_mph > max_mph {
        return CheckResult::fail(format!(
            "average speed {avg_mph:.1} mph exceeds max {max_mph} mph for {}",
            input.activity
        ));
    }

    CheckResult::pass()
}

/// Accelerometer shows real movement energy. A phone on a desk or in a car
/// has a very different RMS profile from walking or running.
pub fn check_motion_energy(input: &CheckInput<'_>) -> CheckResult {
    if input.motion.len() < MIN_MOTION_SAMPLES_FOR_CHECK {
        return CheckResult::flag("not enough motion samples for energy check".to_string());
    }

    let magnitudes = accel_magnitudes(input.motion);
    if magnitudes.len() < MIN_MOTION_SAMPLES_FOR_CHECK {
        return CheckResult::flag("insufficient accel data for energy check".to_string());
    }

    let motion_rms = rms(&magnitudes);
    let min_required = thresholds_for(input.activity).min_accel_rms;

    if motion_rms < min_required {
        return CheckResult::fail(format!(
            "motion energy too low: rms {motion_rms:.3} m/s^2 (need >= {min_required})"
        ));
    }

    CheckResult::pass()
}

/// OS pedometer step rate cross-checked against session duration. The
/// pedometer runs on dedicated hardware and is hard to spoof.
pub fn check_pedometer_plausibility(input: &CheckInput<'_>) -> CheckResult {
    let Some(last) = input.pedometer.last() else {
        // Missing pedometer data is not fraud, some devices lack the sensor.
        return CheckResult::flag("no pedometer data available".to_string());
    };

    let duration_min = input.duration_secs / 60.0;
    if duration_min < 1.0 {
        return CheckResult::pass();
    }

    let steps_per_min = last.steps as f64 / duration_min;
    let limits = thresholds_for(input.activity);

    if steps_per_min < limits.min_steps_per_min {
        return CheckResult::fail(format!(
            "pedometer: {steps_per_min:.0} steps/min (need >= {} for {})",
            limits.min_steps_per_min, input.activity
        ));
    }

    if steps_per_min > limits.max_steps_per_min {
        return CheckResult::fail(format!(
            "pedometer: {steps_per_min:.0} steps/min exceeds max {} for {}",
            limits.max_steps_per_min, input.activity
        ));
    }

    CheckResult::pass()
}

/// Large timestamp gaps in the GPS stream. A few are normal (tunnels,
/// buildings); many means the app was backgrounded or data was fabricated.
pub fn check_timestamp_integrity(input: &CheckInput<'_>) -> CheckResult {
    if input.gps.len() < 2 {
        return CheckResult::pass();
    }

    let mut large_gaps = 0usize;
    for pair in input.gps.windows(2) {
        let gap_sec = (pair[1].captured_at - pair[0].captured_at).num_milliseconds() as f64 / 1000.0;
        if gap_sec > MAX_TIMESTAMP_GAP_SECONDS {
            large_gaps += 1;
        }
    }

    let intervals = input.gps.len() - 1;
    let ratio = large_gaps as f64 / intervals as f64;

    if ratio > TIMESTAMP_GAP_FAIL_RATIO {
        return CheckResult::fail(format!(
            "timestamp gaps: {large_gaps}/{intervals} intervals exceed {MAX_TIMESTAMP_GAP_SECONDS}s"
        ));
    }

    if large_gaps > 0 {
        return CheckResult::flag(format!(
            "{large_gaps} timestamp gap(s) > {MAX_TIMESTAMP_GAP_SECONDS}s detected"
        ));
    }

    CheckResult::pass()
}

/// GPS displacement must correlate with accelerometer activity. Distance with
/// a flat accelerometer means a spoofed GPS; the reverse could be a treadmill.
pub fn check_gps_motion_correlation(input: &CheckInput<'_>) -> CheckResult {
    if input.gps.len() < 2 || input.motion.len() < MIN_MOTION_SAMPLES_FOR_CHECK {
        return CheckResult::pass();
    }

    let mut total_dist = 0.0;
    for pair in input.gps.windows(2) {
        total_dist += haversine_meters(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
    }
    let has_gps_movement = total_dist > MIN_GPS_DISPLACEMENT_METERS;

    let magnitudes = accel_magnitudes(input.motion);
    let motion_rms = rms(&magnitudes);
    let has_motion_energy = motion_rms > MIN_CORRELATION_ACCEL_RMS;

    if has_gps_movement && !has_motion_energy {
        return CheckResult::fail(format!(
            "gps shows {total_dist:.0}m displacement but accelerometer rms is only {motion_rms:.3} m/s^2"
        ));
    }

    if !has_gps_movement && has_motion_energy {
        return CheckResult::flag(format!(
            "motion energy detected (rms {motion_rms:.3}) but gps displacement only {total_dist:.0}m (treadmill?)"
        ));
    }

    CheckResult::pass()
}

/// The session met a baseline effort target for its goal type. Fifty steps
/// in thirty minutes is movement, not effort.
pub fn check_session_goal_target(input: &CheckInput<'_>) -> CheckResult {
    let targets = goal_targets_for(input.activity);
    let actual = input.actual_value;

    match input.goal {
        SessionGoal::Steps => {
            if actual < targets.min_steps {
                return CheckResult::fail(format!(
                    "steps too low: {actual} (need >= {} for {})",
                    targets.min_steps, input.activity
                ));
            }
            CheckResult::pass()
        }
        SessionGoal::Miles => {
            if actual < targets.min_miles {
                return CheckResult::fail(format!(
                    "distance too low: {actual} mi (need >= {} mi for {})",
                    targets.min_miles, input.activity
                ));
            }
            CheckResult::pass()
        }
        SessionGoal::ScreenTime | SessionGoal::SleepTime => {
            CheckResult::flag(format!("goal type {:?} has no target threshold yet", input.goal))
        }
    }
}

fn accel_magnitudes(motion: &[MotionSample]) -> Vec<f64> {
    motion
        .iter()
        .filter_map(|s| match (s.accel_x, s.accel_y, s.accel_z) {
            (Some(x), Some(y), Some(z)) => Some(accel_magnitude(x, y, z)),
            _ => None,
        })
        .collect()
}
