//! Verification pipeline orchestrator.

use crate::checks::{
    check_gps_motion_correlation, check_gps_teleportation, check_minimum_data,
    check_motion_energy, check_pedometer_plausibility, check_session_goal_target,
    check_speed_range, check_timestamp_integrity, CheckInput, CheckResult,
};
use crate::constants::{GPS_ACCURACY_FILTER_METERS, GPS_GLITCH_THRESHOLD_METERS};
use crate::util::{haversine_meters, meters_to_miles};
use std::sync::Arc;
use stride_storage::{SampleStore, StorageError};
use stride_types::{ActivityType, Clock, GpsSample, PedometerSample, Session, SessionGoal, SessionId};
use thiserror::Error;
use tracing::{info, warn};

/// Outcome of running the full pipeline on one session.
#[derive(Clone, Debug)]
pub struct VerificationOutcome {
    pub session_id: SessionId,
    pub passed: bool,
    pub fraud_detected: bool,
    pub flagged_for_review: bool,
    pub review_notes: Option<String>,
    /// Steps or miles achieved, per the session goal.
    pub actual_value: f64,
    pub session_duration_secs: f64,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("storage error during verification: {0}")]
    Storage(#[from] StorageError),
}

/// Anti-fraud verification engine.
///
/// Pulls GPS, motion, and pedometer samples for a completed session, then
/// runs a pipeline of independent checks. Any single check failure means
/// fraud; flagged checks are suspicious but not conclusive and send the
/// session to manual review.
pub struct VerificationEngine {
    samples: Arc<dyn SampleStore>,
    clock: Arc<dyn Clock>,
}

impl VerificationEngine {
    pub fn new(samples: Arc<dyn SampleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { samples, clock }
    }

    /// Run the full pipeline on a completed session.
    pub async fn verify(
        &self,
        session: &Session,
        activity: ActivityType,
    ) -> Result<VerificationOutcome, VerifyError> {
        info!(
            session_id = %session.id,
            goal = ?session.session_goal,
            %activity,
            "verification starting"
        );

        let mut motion = self.samples.get_motion_samples(&session.id).await?;
        let mut gps = self.samples.get_gps_samples(&session.id).await?;
        let mut pedometer = self.samples.get_pedometer_samples(&session.id).await?;
        motion.sort_by_key(|s| s.captured_at);
        gps.sort_by_key(|s| s.captured_at);
        pedometer.sort_by_key(|s| s.captured_at);

        info!(
            session_id = %session.id,
            motion_count = motion.len(),
            gps_count = gps.len(),
            pedometer_count = pedometer.len(),
            "verification samples loaded"
        );

        let duration_secs = self.duration_secs(session, &gps);
        let actual_value = actual_value(session.session_goal, &gps, &pedometer);

        let input = CheckInput {
            activity,
            goal: session.session_goal,
            gps: &gps,
            motion: &motion,
            pedometer: &pedometer,
            duration_secs,
            actual_value,
        };

        let aggregate = run_checks(&input, session.id);

        let outcome = VerificationOutcome {
            session_id: session.id,
            passed: !aggregate.fraud_detected,
            fraud_detected: aggregate.fraud_detected,
            flagged_for_review: aggregate.flagged_for_review,
            review_notes: aggregate.review_notes,
            actual_value,
            session_duration_secs: duration_secs,
        };

        info!(
            session_id = %session.id,
            passed = outcome.passed,
            fraud_detected = outcome.fraud_detected,
            flagged_for_review = outcome.flagged_for_review,
            actual_value = outcome.actual_value,
            duration_secs = outcome.session_duration_secs,
            "verification finished"
        );

        Ok(outcome)
    }

    /// Duration from GPS sample timestamps, falling back to wall clock when
    /// fewer than two fixes exist.
    fn duration_secs(&self, session: &Session, gps_sorted: &[GpsSample]) -> f64 {
        if gps_sorted.len() >= 2 {
            let first = gps_sorted[0].captured_at;
            let last = gps_sorted[gps_sorted.len() - 1].captured_at;
            return ((last - first).num_milliseconds() as f64 / 1000.0).round();
        }
        let end = session.end_date.unwrap_or_else(|| self.clock.now());
        ((end - session.start_date).num_milliseconds() as f64 / 1000.0).round()
    }
}

struct Aggregate {
    fraud_detected: bool,
    flagged_for_review: bool,
    review_notes: Option<String>,
}

fn run_checks(input: &CheckInput<'_>, session_id: SessionId) -> Aggregate {
    type CheckFn = fn(&CheckInput<'_>) -> CheckResult;
    const CHECKS: [(&str, CheckFn); 8] = [
        ("minimum_data", check_minimum_data),
        ("gps_teleportation", check_gps_teleportation),
        ("speed_range", check_speed_range),
        ("motion_energy", check_motion_energy),
        ("pedometer_plausibility", check_pedometer_plausibility),
        ("timestamp_integrity", check_timestamp_integrity),
        ("gps_motion_correlation", check_gps_motion_correlation),
        ("session_goal_target", check_session_goal_target),
    ];

    let mut notes = Vec::new();
    let mut fraud_detected = false;
    let mut flagged_for_review = false;

    for (name, check) in CHECKS {
        let result = check(input);

        if !result.passed {
            fraud_detected = true;
            warn!(%session_id, check = name, note = ?result.note, "fraud check failed");
        }
        if result.flagged {
            flagged_for_review = true;
            info!(%session_id, check = name, note = ?result.note, "fraud check flagged");
        }
        if let Some(note) = result.note {
            notes.push(format!("[{name}] {note}"));
        }
    }

    Aggregate {
        fraud_detected,
        flagged_for_review,
        review_notes: if notes.is_empty() { None } else { Some(notes.join(" | ")) },
    }
}

/// Achievement for the session goal: last cumulative pedometer reading for
/// steps, accuracy-filtered GPS distance for miles.
fn actual_value(goal: SessionGoal, gps_sorted: &[GpsSample], pedometer_sorted: &[PedometerSample]) -> f64 {
    match goal {
        SessionGoal::Steps => pedometer_sorted.last().map_or(0.0, |s| s.steps as f64),
        SessionGoal::Miles => miles_from_gps(gps_sorted),
        SessionGoal::ScreenTime | SessionGoal::SleepTime => 0.0,
    }
}

/// Distance in miles, rounded to two decimals. Low-accuracy fixes are
/// dropped and single glitch jumps are not counted.
fn miles_from_gps(gps_sorted: &[GpsSample]) -> f64 {
    let accurate: Vec<&GpsSample> = gps_sorted
        .iter()
        .filter(|s| s.horiz_acc.map_or(true, |acc| acc <= GPS_ACCURACY_FILTER_METERS))
        .collect();
    if accurate.len() < 2 {
        return 0.0;
    }

    let mut total_meters = 0.0;
    for pair in accurate.windows(2) {
        let d = haversine_meters(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
        if d < GPS_GLITCH_THRESHOLD_METERS {
            total_meters += d;
        }
    }
    (meters_to_miles(total_meters) * 100.0).round() / 100.0
}
