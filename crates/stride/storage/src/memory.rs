//! In-memory reference implementation for the Stride storage traits.
//!
//! Deterministic and test-friendly. Enforces the same invariants a relational
//! backend would via constraints: the partial unique index on
//! (commitment, counting day), unique gateway references, and atomic pool
//! deltas under a single write lock.

use crate::traits::{
    CommitmentStore, ForfeitApply, PoolStore, SampleStore, SessionStore, TransactionStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use stride_types::{
    Commitment, CommitmentId, CommitmentStatus, GpsSample, MotionSample, PedometerSample, Pool,
    Session, SessionId, SessionStatus, Transaction, TransactionStatus, TransactionType, UserId,
    VerificationStatus,
};

/// In-memory Stride storage adapter.
pub struct InMemoryStrideStorage {
    commitments: RwLock<HashMap<CommitmentId, Commitment>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    motion: RwLock<Vec<MotionSample>>,
    gps: RwLock<Vec<GpsSample>>,
    pedometer: RwLock<Vec<PedometerSample>>,
    transactions: RwLock<Vec<Transaction>>,
    pool: RwLock<Pool>,
}

impl InMemoryStrideStorage {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            commitments: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            motion: RwLock::new(Vec::new()),
            gps: RwLock::new(Vec::new()),
            pedometer: RwLock::new(Vec::new()),
            transactions: RwLock::new(Vec::new()),
            pool: RwLock::new(Pool {
                stakes_held_cents: 0,
                balance_cents: 0,
                total_rake_cents: 0,
                created_at: now,
                updated_at: now,
            }),
        }
    }
}

impl Default for InMemoryStrideStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(table: &str) -> StorageError {
    StorageError::Backend(format!("{table} lock poisoned"))
}

#[async_trait]
impl CommitmentStore for InMemoryStrideStorage {
    async fn insert_commitment(&self, commitment: Commitment) -> StorageResult<()> {
        let mut guard = self.commitments.write().map_err(|_| poisoned("commitments"))?;
        if guard.contains_key(&commitment.id) {
            return Err(StorageError::Conflict(format!(
                "commitment {} already exists",
                commitment.id
            )));
        }
        guard.insert(commitment.id, commitment);
        Ok(())
    }

    async fn get_commitment(&self, id: &CommitmentId) -> StorageResult<Option<Commitment>> {
        let guard = self.commitments.read().map_err(|_| poisoned("commitments"))?;
        Ok(guard.get(id).cloned())
    }

    async fn list_commitments_by_user(&self, user_id: &UserId) -> StorageResult<Vec<Commitment>> {
        let guard = self.commitments.read().map_err(|_| poisoned("commitments"))?;
        let mut values: Vec<_> = guard
            .values()
            .filter(|c| c.user_id == *user_id)
            .cloned()
            .collect();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(values)
    }

    async fn list_expired_active(&self, now: DateTime<Utc>) -> StorageResult<Vec<Commitment>> {
        let guard = self.commitments.read().map_err(|_| poisoned("commitments"))?;
        let mut values: Vec<_> = guard
            .values()
            .filter(|c| c.status == CommitmentStatus::Active)
            .filter(|c| c.end_date.is_some_and(|end| end < now))
            .cloned()
            .collect();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        expected_from: CommitmentStatus,
        to: CommitmentStatus,
    ) -> StorageResult<()> {
        let mut guard = self.commitments.write().map_err(|_| poisoned("commitments"))?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("commitment {id} not found")))?;

        if record.status != expected_from {
            return Err(StorageError::Conflict(format!(
                "commitment {id}: expected status {expected_from:?}, found {:?}",
                record.status
            )));
        }

        record.status = to;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStrideStorage {
    async fn insert_session(&self, session: Session) -> StorageResult<()> {
        let mut guard = self.sessions.write().map_err(|_| poisoned("sessions"))?;
        if guard.contains_key(&session.id) {
            return Err(StorageError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }

        // Partial unique index: one non-cancelled session per commitment per
        // counting day.
        let collision = guard.values().any(|existing| {
            existing.commitment_id == session.commitment_id
                && existing.counting_day == session.counting_day
                && existing.status != SessionStatus::Cancelled
        });
        if collision {
            return Err(StorageError::UniqueViolation(format!(
                "non-cancelled session already exists for commitment {} on {}",
                session.commitment_id, session.counting_day
            )));
        }

        guard.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> StorageResult<Option<Session>> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        Ok(guard.get(id).cloned())
    }

    async fn list_sessions_by_user(&self, user_id: &UserId) -> StorageResult<Vec<Session>> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        let mut values: Vec<_> = guard
            .values()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        values.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(values)
    }

    async fn list_sessions_by_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Vec<Session>> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        let mut values: Vec<_> = guard
            .values()
            .filter(|s| s.commitment_id == *commitment_id)
            .cloned()
            .collect();
        values.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(values)
    }

    async fn find_active_session(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Option<Session>> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        Ok(guard
            .values()
            .find(|s| s.commitment_id == *commitment_id && s.is_active())
            .cloned())
    }

    async fn count_sessions_with_verification(
        &self,
        commitment_id: &CommitmentId,
        status: VerificationStatus,
    ) -> StorageResult<u32> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        Ok(guard
            .values()
            .filter(|s| s.commitment_id == *commitment_id && s.verification_status == status)
            .count() as u32)
    }

    async fn update_session(&self, session: Session) -> StorageResult<()> {
        let mut guard = self.sessions.write().map_err(|_| poisoned("sessions"))?;
        if !guard.contains_key(&session.id) {
            return Err(StorageError::NotFound(format!(
                "session {} not found",
                session.id
            )));
        }
        guard.insert(session.id, session);
        Ok(())
    }
}

#[async_trait]
impl SampleStore for InMemoryStrideStorage {
    async fn insert_motion_samples(&self, samples: Vec<MotionSample>) -> StorageResult<()> {
        let mut guard = self.motion.write().map_err(|_| poisoned("motion_samples"))?;
        guard.extend(samples);
        Ok(())
    }

    async fn insert_gps_samples(&self, samples: Vec<GpsSample>) -> StorageResult<()> {
        let mut guard = self.gps.write().map_err(|_| poisoned("gps_samples"))?;
        guard.extend(samples);
        Ok(())
    }

    async fn insert_pedometer_samples(&self, samples: Vec<PedometerSample>) -> StorageResult<()> {
        let mut guard = self
            .pedometer
            .write()
            .map_err(|_| poisoned("pedometer_samples"))?;
        guard.extend(samples);
        Ok(())
    }

    async fn get_motion_samples(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<MotionSample>> {
        let guard = self.motion.read().map_err(|_| poisoned("motion_samples"))?;
        Ok(guard
            .iter()
            .filter(|s| s.session_id == *session_id)
            .cloned()
            .collect())
    }

    async fn get_gps_samples(&self, session_id: &SessionId) -> StorageResult<Vec<GpsSample>> {
        let guard = self.gps.read().map_err(|_| poisoned("gps_samples"))?;
        Ok(guard
            .iter()
            .filter(|s| s.session_id == *session_id)
            .cloned()
            .collect())
    }

    async fn get_pedometer_samples(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<PedometerSample>> {
        let guard = self
            .pedometer
            .read()
            .map_err(|_| poisoned("pedometer_samples"))?;
        Ok(guard
            .iter()
            .filter(|s| s.session_id == *session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionStore for InMemoryStrideStorage {
    async fn insert_transaction(&self, tx: Transaction) -> StorageResult<()> {
        if tx.amount_cents <= 0 {
            return Err(StorageError::InvalidInput(format!(
                "transaction amount must be positive, got {}",
                tx.amount_cents
            )));
        }
        let mut guard = self
            .transactions
            .write()
            .map_err(|_| poisoned("transactions"))?;
        if guard.iter().any(|t| t.gateway_ref == tx.gateway_ref) {
            return Err(StorageError::Conflict(format!(
                "transaction with gateway ref {} already exists",
                tx.gateway_ref
            )));
        }
        guard.push(tx);
        Ok(())
    }

    async fn get_transaction_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> StorageResult<Option<Transaction>> {
        let guard = self
            .transactions
            .read()
            .map_err(|_| poisoned("transactions"))?;
        Ok(guard.iter().find(|t| t.gateway_ref == gateway_ref).cloned())
    }

    async fn set_transaction_status(
        &self,
        gateway_ref: &str,
        status: TransactionStatus,
    ) -> StorageResult<Transaction> {
        let mut guard = self
            .transactions
            .write()
            .map_err(|_| poisoned("transactions"))?;
        let tx = guard
            .iter_mut()
            .find(|t| t.gateway_ref == gateway_ref)
            .ok_or_else(|| {
                StorageError::NotFound(format!("transaction with gateway ref {gateway_ref}"))
            })?;
        tx.status = status;
        Ok(tx.clone())
    }

    async fn find_stake_for_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Option<Transaction>> {
        let guard = self
            .transactions
            .read()
            .map_err(|_| poisoned("transactions"))?;
        Ok(guard
            .iter()
            .filter(|t| t.commitment_id == *commitment_id && t.tx_type == TransactionType::Stake)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_transactions_by_commitment(
        &self,
        commitment_id: &CommitmentId,
    ) -> StorageResult<Vec<Transaction>> {
        let guard = self
            .transactions
            .read()
            .map_err(|_| poisoned("transactions"))?;
        let mut values: Vec<_> = guard
            .iter()
            .filter(|t| t.commitment_id == *commitment_id)
            .cloned()
            .collect();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }
}

#[async_trait]
impl PoolStore for InMemoryStrideStorage {
    async fn fetch_pool(&self) -> StorageResult<Pool> {
        let guard = self.pool.read().map_err(|_| poisoned("pool"))?;
        Ok(guard.clone())
    }

    async fn pool_add_stake(&self, cents: i64) -> StorageResult<()> {
        let mut guard = self.pool.write().map_err(|_| poisoned("pool"))?;
        guard.stakes_held_cents += cents;
        guard.updated_at = Utc::now();
        Ok(())
    }

    async fn pool_apply_forfeit(&self, apply: ForfeitApply) -> StorageResult<()> {
        if apply.rake_cents + apply.pool_cents != apply.stake_cents {
            return Err(StorageError::InvalidInput(format!(
                "forfeit split {} + {} does not sum to stake {}",
                apply.rake_cents, apply.pool_cents, apply.stake_cents
            )));
        }

        // Both audit transactions and the pool deltas commit as one unit:
        // take all write locks up front, insert, then apply.
        let mut txs = self
            .transactions
            .write()
            .map_err(|_| poisoned("transactions"))?;
        let mut pool = self.pool.write().map_err(|_| poisoned("pool"))?;

        for tx in [&apply.forfeit_tx, &apply.rake_tx] {
            if txs.iter().any(|t| t.gateway_ref == tx.gateway_ref) {
                return Err(StorageError::Conflict(format!(
                    "transaction with gateway ref {} already exists",
                    tx.gateway_ref
                )));
            }
        }
        txs.push(apply.forfeit_tx);
        txs.push(apply.rake_tx);

        pool.stakes_held_cents = (pool.stakes_held_cents - apply.stake_cents).max(0);
        pool.balance_cents += apply.pool_cents;
        pool.total_rake_cents += apply.rake_cents;
        pool.updated_at = Utc::now();
        Ok(())
    }

    async fn pool_subtract_refund(&self, cents: i64) -> StorageResult<()> {
        let mut guard = self.pool.write().map_err(|_| poisoned("pool"))?;
        guard.stakes_held_cents = (guard.stakes_held_cents - cents).max(0);
        guard.updated_at = Utc::now();
        Ok(())
    }

    async fn pool_subtract_payout(&self, stake_cents: i64, _bonus_cents: i64) -> StorageResult<()> {
        let mut guard = self.pool.write().map_err(|_| poisoned("pool"))?;
        guard.stakes_held_cents = (guard.stakes_held_cents - stake_cents).max(0);
        guard.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stride_types::{SampleId, SessionGoal, UserId};

    fn session_for_day(commitment_id: CommitmentId, day: NaiveDate) -> Session {
        Session {
            id: SessionId::generate(),
            user_id: UserId::generate(),
            commitment_id,
            timezone: "UTC".to_string(),
            counting_day: day,
            start_date: Utc::now(),
            end_date: None,
            created_at: Utc::now(),
            completed_at: None,
            session_duration_secs: 0.0,
            status: SessionStatus::InProgress,
            verification_status: VerificationStatus::NotStarted,
            session_goal: SessionGoal::Steps,
            actual_value: None,
            flagged_for_review: false,
            fraud_detected: false,
            review_notes: None,
        }
    }

    #[tokio::test]
    async fn second_session_for_same_day_is_rejected() {
        let storage = InMemoryStrideStorage::new();
        let commitment_id = CommitmentId::generate();
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        storage
            .insert_session(session_for_day(commitment_id, day))
            .await
            .unwrap();
        let result = storage.insert_session(session_for_day(commitment_id, day)).await;
        assert!(matches!(result, Err(StorageError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn cancelled_session_frees_the_day_slot() {
        let storage = InMemoryStrideStorage::new();
        let commitment_id = CommitmentId::generate();
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let mut first = session_for_day(commitment_id, day);
        let first_id = first.id;
        storage.insert_session(first.clone()).await.unwrap();

        first.status = SessionStatus::Cancelled;
        storage.update_session(first).await.unwrap();

        storage
            .insert_session(session_for_day(commitment_id, day))
            .await
            .unwrap();

        let stored = storage.get_session(&first_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn transition_commitment_is_a_compare_and_swap() {
        let storage = InMemoryStrideStorage::new();
        let commitment = Commitment {
            id: CommitmentId::generate(),
            user_id: UserId::generate(),
            activity: stride_types::ActivityType::Walk,
            frequency: stride_types::WorkoutFrequency::ThreeTimesAWeek,
            duration: stride_types::CommitmentDuration::OneWeeks,
            session_goal: SessionGoal::Steps,
            stake_cents: 1_000,
            locked_bonus_cents: 0,
            status: CommitmentStatus::Active,
            start_date: Utc::now(),
            end_date: None,
            created_at: Utc::now(),
            grace_period_ends_at: Utc::now(),
        };
        let id = commitment.id;
        storage.insert_commitment(commitment).await.unwrap();

        storage
            .transition_commitment(&id, CommitmentStatus::Active, CommitmentStatus::Completed)
            .await
            .unwrap();

        // Second CAS from Active must lose.
        let result = storage
            .transition_commitment(&id, CommitmentStatus::Active, CommitmentStatus::Completed)
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn forfeit_split_must_sum_to_stake() {
        let storage = InMemoryStrideStorage::new();
        let commitment_id = CommitmentId::generate();
        let user_id = UserId::generate();
        let tx = |suffix: &str, tx_type, amount| Transaction {
            id: stride_types::TransactionId::generate(),
            user_id,
            commitment_id,
            tx_type,
            status: TransactionStatus::Succeeded,
            gateway_ref: format!("{suffix}_{commitment_id}"),
            gateway_customer_ref: None,
            amount_cents: amount,
            created_at: Utc::now(),
        };

        let bad = ForfeitApply {
            stake_cents: 1_000,
            rake_cents: 200,
            pool_cents: 700,
            forfeit_tx: tx("forfeit", TransactionType::Forfeit, 1_000),
            rake_tx: tx("rake", TransactionType::Rake, 200),
        };
        assert!(matches!(
            storage.pool_apply_forfeit(bad).await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn stakes_held_floors_at_zero() {
        let storage = InMemoryStrideStorage::new();
        storage.pool_add_stake(500).await.unwrap();
        storage.pool_subtract_refund(9_999).await.unwrap();
        let pool = storage.fetch_pool().await.unwrap();
        assert_eq!(pool.stakes_held_cents, 0);
    }

    #[tokio::test]
    async fn samples_are_append_only_and_scoped_to_session() {
        let storage = InMemoryStrideStorage::new();
        let session_a = SessionId::generate();
        let session_b = SessionId::generate();

        let sample = |sid| PedometerSample {
            id: SampleId::generate(),
            session_id: sid,
            captured_at: Utc::now(),
            steps: 100,
        };
        storage
            .insert_pedometer_samples(vec![sample(session_a), sample(session_a), sample(session_b)])
            .await
            .unwrap();

        assert_eq!(storage.get_pedometer_samples(&session_a).await.unwrap().len(), 2);
        assert_eq!(storage.get_pedometer_samples(&session_b).await.unwrap().len(), 1);
    }
}
