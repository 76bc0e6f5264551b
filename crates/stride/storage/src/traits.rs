use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stride_types::{
    Commitment, CommitmentId, CommitmentStatus, GpsSample, MotionSample, PedometerSample, Pool,
    Session, SessionId, Transaction, TransactionStatus, UserId, VerificationStatus,
};

/// Storage interface for commitment records.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    /// Insert a new commitment. Fails with `Conflict` if the id exists.
    async fn insert_commitment(&self, commitment: Commitment) -> StorageResult<()>;

    async fn get_commitment(&self, id: &CommitmentId) -> StorageResult<Option<Commitment>>;

    async fn list_commitments_by_user(&self, user_id: &UserId) -> StorageResult<Vec<Commitment>>;

    /// Active commitments whose end date has passed, for the expiration sweep.
    async fn list_expired_active(&self, now: DateTime<Utc>) -> StorageResult<Vec<Commitment>>;

    /// Conditional status transition - a compare-and-swap on the status
    /// column. Fails with `Conflict` when the current status is not
    /// `expected_from`, which is how at-most-once completion is enforced.
    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        expected_from: CommitmentStatus,
        to: CommitmentStatus,
    ) -> StorageResult<()>;
}

/// Storage interface for exercise sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    ///
    /// Enforces the partial unique index on (commitment, counting day): if a
    /// non-cancelled session already exists for that pair, fails with
    /// `UniqueViolation`.
    async fn insert_session(&self, session: Session) -> StorageResult<()>;

    async fn get_session(&self, id: &SessionId) -> StorageResult<Option<Session>>;

    async fn list_sessions_by_user(&self, user_id: &UserId) -> StorageResult<Vec<Session>>;

    async fn list_sessions_by_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Vec<Session>>;

    /// The in-progress or paused session for a commitment, if any.
    async fn find_active_session(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Option<Session>>;

    async fn count_sessions_with_verification(
        &self,
        commitment_id: &CommitmentId,
        status: VerificationStatus,
    ) -> StorageResult<u32>;

    /// Replace an existing session row. Fails with `NotFound` if missing.
    async fn update_session(&self, session: Session) -> StorageResult<()>;
}

/// Append-only storage for raw sensor readings.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn insert_motion_samples(&self, samples: Vec<MotionSample>) -> StorageResult<()>;
    async fn insert_gps_samples(&self, samples: Vec<GpsSample>) -> StorageResult<()>;
    async fn insert_pedometer_samples(&self, samples: Vec<PedometerSample>) -> StorageResult<()>;

    async fn get_motion_samples(&self, session_id: &SessionId)
        -> StorageResult<Vec<MotionSample>>;
    async fn get_gps_samples(&self, session_id: &SessionId) -> StorageResult<Vec<GpsSample>>;
    async fn get_pedometer_samples(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<PedometerSample>>;
}

/// Storage interface for immutable financial events.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction. Gateway references are unique; a duplicate fails
    /// with `Conflict`, which gives callers idempotent event handling.
    async fn insert_transaction(&self, tx: Transaction) -> StorageResult<()>;

    async fn get_transaction_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> StorageResult<Option<Transaction>>;

    async fn set_transaction_status(
        &self,
        gateway_ref: &str,
        status: TransactionStatus,
    ) -> StorageResult<Transaction>;

    /// The most recent stake transaction for a commitment, if any.
    async fn find_stake_for_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Option<Transaction>>;

    async fn list_transactions_by_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Vec<Transaction>>;
}

/// One atomic forfeiture: pool deltas plus the two audit transactions,
/// applied as a single unit so a partial write can never leave money
/// unaccounted for.
#[derive(Clone, Debug)]
pub struct ForfeitApply {
    pub stake_cents: i64,
    pub rake_cents: i64,
    pub pool_cents: i64,
    pub forfeit_tx: Transaction,
    pub rake_tx: Transaction,
}

/// Storage interface for the singleton escrow pool row.
///
/// Every mutation is an atomic increment/decrement applied by the adapter -
/// callers never read-modify-write the row themselves.
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn fetch_pool(&self) -> StorageResult<Pool>;

    /// stakes_held += cents.
    async fn pool_add_stake(&self, cents: i64) -> StorageResult<()>;

    /// stakes_held -= stake (floored at 0); balance += pool share;
    /// rake total += rake share; both audit transactions inserted.
    async fn pool_apply_forfeit(&self, apply: ForfeitApply) -> StorageResult<()>;

    /// stakes_held -= cents (floored at 0).
    async fn pool_subtract_refund(&self, cents: i64) -> StorageResult<()>;

    /// stakes_held -= stake_cents (floored at 0). Bonus subtraction from the
    /// balance is a documented no-op while bonuses always compute to zero.
    async fn pool_subtract_payout(&self, stake_cents: i64, bonus_cents: i64) -> StorageResult<()>;
}

/// Unified storage bundle consumed by the Stride services.
pub trait StrideStorage:
    CommitmentStore + SessionStore + SampleStore + TransactionStore + PoolStore + Send + Sync
{
}

impl<T> StrideStorage for T where
    T: CommitmentStore + SessionStore + SampleStore + TransactionStore + PoolStore + Send + Sync
{
}
