//! Thresholds for the verification pipeline. Nothing inline; every magic
//! number the checks use lives here.

use stride_types::ActivityType;

// Data density, relative to session duration.

/// Minimum GPS readings per minute (clients report roughly 12/min at 5s intervals).
pub const MIN_GPS_SAMPLES_PER_MIN: f64 = 3.0;

/// Minimum motion readings per minute (clients report roughly 600/min at 10 Hz).
pub const MIN_MOTION_SAMPLES_PER_MIN: f64 = 30.0;

/// Minimum motion samples before the energy / correlation checks run at all.
pub const MIN_MOTION_SAMPLES_FOR_CHECK: usize = 10;

/// Sessions shorter than this are auto-failed.
pub const MIN_SESSION_DURATION_SECONDS: f64 = 60.0;

// GPS quality.

/// GPS fixes with horizontal accuracy worse than this (meters) are discarded
/// by the speed and correlation checks.
pub const MAX_GPS_ACCURACY_METERS: f64 = 50.0;

/// Stricter accuracy filter used when computing actual distance (meters).
pub const GPS_ACCURACY_FILTER_METERS: f64 = 30.0;

/// Single GPS jumps larger than this (meters) are glitches and are not
/// counted toward distance.
pub const GPS_GLITCH_THRESHOLD_METERS: f64 = 100.0;

/// Minimum total GPS displacement (meters) to count as real movement.
pub const MIN_GPS_DISPLACEMENT_METERS: f64 = 50.0;

// Teleportation detection.

/// Ratio of GPS segments exceeding the speed ceiling before the session
/// fails outright rather than being flagged.
pub const TELEPORTATION_FAIL_RATIO: f64 = 0.15;

// Timestamp integrity.

/// Gap between consecutive GPS fixes (seconds) that counts as a large gap.
pub const MAX_TIMESTAMP_GAP_SECONDS: f64 = 120.0;

/// Ratio of large-gap intervals to total intervals before failing.
pub const TIMESTAMP_GAP_FAIL_RATIO: f64 = 0.25;

// GPS / motion correlation.

/// Minimum accelerometer RMS (m/s^2) for the phone to count as in motion.
pub const MIN_CORRELATION_ACCEL_RMS: f64 = 0.2;

/// Per-activity limits used by the fraud checks.
#[derive(Clone, Copy, Debug)]
pub struct ActivityThresholds {
    pub teleport_speed_mph: f64,
    pub max_avg_speed_mph: f64,
    pub min_steps_per_min: f64,
    pub max_steps_per_min: f64,
    pub min_accel_rms: f64,
}

pub const WALK_THRESHOLDS: ActivityThresholds = ActivityThresholds {
    teleport_speed_mph: 15.0,
    max_avg_speed_mph: 7.0,
    min_steps_per_min: 30.0,
    max_steps_per_min: 180.0,
    min_accel_rms: 0.3,
};

pub const RUN_THRESHOLDS: ActivityThresholds = ActivityThresholds {
    teleport_speed_mph: 30.0,
    max_avg_speed_mph: 20.0,
    min_steps_per_min: 80.0,
    max_steps_per_min: 260.0,
    min_accel_rms: 0.5,
};

/// Thresholds for an activity, defaulting to the run profile for activities
/// without a dedicated one.
pub fn thresholds_for(activity: ActivityType) -> ActivityThresholds {
    match activity {
        ActivityType::Walk => WALK_THRESHOLDS,
        _ => RUN_THRESHOLDS,
    }
}

/// Minimum effort targets per goal type.
#[derive(Clone, Copy, Debug)]
pub struct GoalTargets {
    pub min_steps: f64,
    pub min_miles: f64,
}

pub const WALK_GOAL_TARGETS: GoalTargets = GoalTargets {
    min_steps: 2_000.0,
    min_miles: 1.0,
};

pub const RUN_GOAL_TARGETS: GoalTargets = GoalTargets {
    min_steps: 2_000.0,
    min_miles: 1.5,
};

pub fn goal_targets_for(activity: ActivityType) -> GoalTargets {
    match activity {
        ActivityType::Walk => WALK_GOAL_TARGETS,
        _ => RUN_GOAL_TARGETS,
    }
}
