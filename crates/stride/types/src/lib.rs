//! Stride domain model - the shared vocabulary of every other crate.
//!
//! Commitments, sessions, sensor samples, transactions, and the escrow pool
//! row are all plain serde records here; behavior lives in the service crates.

#![deny(unsafe_code)]

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Allowed stake range, in cents.
pub const STAKE_MIN_CENTS: i64 = 50;
pub const STAKE_MAX_CENTS: i64 = 10_000;

/// Cancellation within this window after creation refunds the stake.
pub const GRACE_PERIOD_DAYS: i64 = 1;

// ── Ids ──────────────────────────────────────────────────────────────

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Owner of commitments and sessions.
    UserId
);
uuid_id!(CommitmentId);
uuid_id!(SessionId);
uuid_id!(TransactionId);
uuid_id!(SampleId);

// ── Enums ────────────────────────────────────────────────────────────

/// Activity a commitment stakes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Walk,
    Run,
    Sleep,
    Screentime,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityType::Walk => "walk",
            ActivityType::Run => "run",
            ActivityType::Sleep => "sleep",
            ActivityType::Screentime => "screentime",
        };
        write!(f, "{s}")
    }
}

/// Required sessions per week.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutFrequency {
    ThreeTimesAWeek,
    FourTimesAWeek,
    FiveTimesAWeek,
    SixTimesAWeek,
    SevenTimesAWeek,
}

impl WorkoutFrequency {
    pub fn sessions_per_week(self) -> u32 {
        match self {
            WorkoutFrequency::ThreeTimesAWeek => 3,
            WorkoutFrequency::FourTimesAWeek => 4,
            WorkoutFrequency::FiveTimesAWeek => 5,
            WorkoutFrequency::SixTimesAWeek => 6,
            WorkoutFrequency::SevenTimesAWeek => 7,
        }
    }
}

/// Total commitment length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentDuration {
    OneWeeks,
    TwoWeeks,
    ThreeWeeks,
    FourWeeks,
}

impl CommitmentDuration {
    pub fn weeks(self) -> u32 {
        match self {
            CommitmentDuration::OneWeeks => 1,
            CommitmentDuration::TwoWeeks => 2,
            CommitmentDuration::ThreeWeeks => 3,
            CommitmentDuration::FourWeeks => 4,
        }
    }
}

/// What a session is measured in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionGoal {
    Steps,
    Miles,
    ScreenTime,
    SleepTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    PendingPayment,
    PaymentProcessing,
    Active,
    Completed,
    Forfeited,
    Cancelled,
    CancelledRefunded,
    RefundPending,
}

impl CommitmentStatus {
    /// True once no further lifecycle transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommitmentStatus::Completed
                | CommitmentStatus::Forfeited
                | CommitmentStatus::Cancelled
                | CommitmentStatus::CancelledRefunded
        )
    }

    /// Statuses that count against the one-in-flight-commitment-per-owner rule.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            CommitmentStatus::PendingPayment
                | CommitmentStatus::PaymentProcessing
                | CommitmentStatus::Active
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotStarted,
    Pending,
    Failed,
    Succeeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Stake,
    Payout,
    Forfeit,
    Rake,
    Refund,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

// ── Records ──────────────────────────────────────────────────────────

/// A staked promise: activity, cadence, duration, and money on the line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub user_id: UserId,
    pub activity: ActivityType,
    pub frequency: WorkoutFrequency,
    pub duration: CommitmentDuration,
    pub session_goal: SessionGoal,
    /// Stake in cents, within [`STAKE_MIN_CENTS`]..=[`STAKE_MAX_CENTS`].
    pub stake_cents: i64,
    pub locked_bonus_cents: i64,
    pub status: CommitmentStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub grace_period_ends_at: DateTime<Utc>,
}

impl Commitment {
    /// Sessions the owner must get verified for the commitment to complete.
    pub fn required_sessions(&self) -> u32 {
        self.frequency.sessions_per_week() * self.duration.weeks()
    }
}

/// One dated attempt at a commitment's daily requirement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub commitment_id: CommitmentId,
    /// IANA zone the session was started in (e.g. America/Los_Angeles).
    pub timezone: String,
    /// Calendar day this session counts toward, in the session's timezone.
    pub counting_day: NaiveDate,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_duration_secs: f64,
    pub status: SessionStatus,
    pub verification_status: VerificationStatus,
    pub session_goal: SessionGoal,
    /// Steps, miles, etc. actually achieved. Written by verification.
    pub actual_value: Option<f64>,
    pub flagged_for_review: bool,
    pub fraud_detected: bool,
    pub review_notes: Option<String>,
}

impl Session {
    /// Counts against the one-active-session-per-commitment guard.
    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::InProgress | SessionStatus::Paused)
    }
}

/// Accelerometer / gyroscope reading. All units SI (m/s², degrees, deg/s).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionSample {
    pub id: SampleId,
    pub session_id: SessionId,
    pub captured_at: DateTime<Utc>,
    pub interval_ms: Option<f64>,
    // Acceleration without gravity
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    // Acceleration including gravity
    pub accel_gx: Option<f64>,
    pub accel_gy: Option<f64>,
    pub accel_gz: Option<f64>,
    pub rot_alpha: Option<f64>,
    pub rot_beta: Option<f64>,
    pub rot_gamma: Option<f64>,
    pub rot_rate_alpha: Option<f64>,
    pub rot_rate_beta: Option<f64>,
    pub rot_rate_gamma: Option<f64>,
    pub orientation: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsSample {
    pub id: SampleId,
    pub session_id: SessionId,
    pub captured_at: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    /// Horizontal accuracy of the fix, in meters.
    pub horiz_acc: Option<f64>,
}

/// Cumulative step count from the OS pedometer since session start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PedometerSample {
    pub id: SampleId,
    pub session_id: SessionId,
    pub captured_at: DateTime<Utc>,
    pub steps: i64,
}

/// Immutable financial event tied to exactly one commitment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub commitment_id: CommitmentId,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Reference issued by the payment gateway (charge / refund id).
    pub gateway_ref: String,
    pub gateway_customer_ref: Option<String>,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// The singleton escrow pool row. All amounts in cents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pool {
    /// Stakes currently held - owed back to users on completion or refund.
    pub stakes_held_cents: i64,
    /// Forfeiture proceeds available for future bonuses.
    pub balance_cents: i64,
    /// Platform's cumulative cut of forfeitures, kept for audit.
    pub total_rake_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Counting day ─────────────────────────────────────────────────────

/// Calendar date of `instant` in the given IANA timezone.
///
/// Sessions count toward the local day they were started on, not the UTC day -
/// a 11pm session in Los Angeles must not collide with the next morning's.
pub fn counting_day(instant: DateTime<Utc>, timezone: &str) -> Result<NaiveDate, DomainError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| DomainError::InvalidTimezone(timezone.to_string()))?;
    Ok(tz.from_utc_datetime(&instant.naive_utc()).date_naive())
}

/// Validate a stake amount against the allowed range.
pub fn validate_stake_cents(cents: i64) -> Result<(), DomainError> {
    if (STAKE_MIN_CENTS..=STAKE_MAX_CENTS).contains(&cents) {
        Ok(())
    } else {
        Err(DomainError::InvalidStakeAmount(cents))
    }
}

/// End of the refund grace period for a commitment created at `created_at`.
pub fn grace_period_end(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::days(GRACE_PERIOD_DAYS)
}

/// Malformed domain input.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not a valid IANA timezone: {0}")]
    InvalidTimezone(String),

    #[error("stake amount {0} cents outside allowed range {STAKE_MIN_CENTS}..={STAKE_MAX_CENTS}")]
    InvalidStakeAmount(i64),
}
