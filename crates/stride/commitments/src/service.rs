//! Commitment lifecycle service.

use crate::error::CommitmentError;
use crate::payout::{PayoutResult, PayoutService};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use stride_escrow::{split_forfeit, EscrowService, ForfeitSplit};
use stride_payments::PaymentGateway;
use stride_storage::{StorageError, StrideStorage};
use stride_types::{
    grace_period_end, validate_stake_cents, ActivityType, Clock, Commitment, CommitmentDuration,
    CommitmentId, CommitmentStatus, SessionGoal, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserId, VerificationStatus, WorkoutFrequency,
};
use tracing::{info, warn};

/// Creation parameters. Start and end dates, grace period, and status are
/// derived, never supplied.
#[derive(Clone, Debug)]
pub struct CreateCommitment {
    pub activity: ActivityType,
    pub frequency: WorkoutFrequency,
    pub duration: CommitmentDuration,
    pub session_goal: SessionGoal,
    pub stake_cents: i64,
}

/// Read-only answer to "what happens if I cancel right now".
#[derive(Clone, Debug)]
pub struct CancelPreview {
    pub commitment_id: CommitmentId,
    pub refundable: bool,
    pub forfeit_cents: i64,
    pub stake_cents: i64,
    pub grace_period_ends_at: DateTime<Utc>,
}

/// What a cancellation actually did.
#[derive(Clone, Debug)]
pub enum CancelOutcome {
    /// Nothing was staked yet; the commitment is simply cancelled.
    FreeCancel,
    /// Stake refund issued; finalizes when the refund settles.
    RefundPending { refund_ref: String },
    /// Past the grace period; the stake was forfeited.
    Forfeited(ForfeitSplit),
}

/// Result of a completion check.
#[derive(Clone, Debug)]
pub enum CompletionCheck {
    /// Verified-session count still below the requirement.
    NotReady { verified: u32, required: u32 },
    /// Requirement met numerically, but a failed verification blocks
    /// completion outright.
    Blocked { failed_sessions: u32 },
    /// Another caller already settled this commitment.
    AlreadySettled,
    /// This call completed the commitment and paid out the stake.
    Completed(PayoutResult),
}

pub struct CommitmentService {
    storage: Arc<dyn StrideStorage>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    escrow: Arc<EscrowService>,
    payouts: PayoutService,
}

impl CommitmentService {
    pub fn new(
        storage: Arc<dyn StrideStorage>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        escrow: Arc<EscrowService>,
    ) -> Self {
        let payouts = PayoutService::new(storage.clone(), gateway.clone(), escrow.clone());
        Self { storage, clock, gateway, escrow, payouts }
    }

    pub async fn list_commitments(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Commitment>, CommitmentError> {
        Ok(self.storage.list_commitments_by_user(user_id).await?)
    }

    pub async fn get_commitment(
        &self,
        id: &CommitmentId,
        user_id: &UserId,
    ) -> Result<Commitment, CommitmentError> {
        let commitment = self
            .storage
            .get_commitment(id)
            .await?
            .ok_or(CommitmentError::NotFound)?;
        if commitment.user_id != *user_id {
            return Err(CommitmentError::Unauthorized);
        }
        Ok(commitment)
    }

    /// Create a commitment in `pending_payment`. One in-flight commitment
    /// per owner: anything pending, processing, or active blocks a new one.
    pub async fn create_commitment(
        &self,
        user_id: &UserId,
        input: CreateCommitment,
    ) -> Result<Commitment, CommitmentError> {
        validate_stake_cents(input.stake_cents)
            .map_err(|_| CommitmentError::InvalidStake(input.stake_cents))?;

        let existing = self.storage.list_commitments_by_user(user_id).await?;
        if existing.iter().any(|c| c.status.is_in_flight()) {
            return Err(CommitmentError::ActiveCommitmentExists);
        }

        let now = self.clock.now();
        let commitment = Commitment {
            id: CommitmentId::generate(),
            user_id: *user_id,
            activity: input.activity,
            frequency: input.frequency,
            duration: input.duration,
            session_goal: input.session_goal,
            stake_cents: input.stake_cents,
            locked_bonus_cents: 0,
            status: CommitmentStatus::PendingPayment,
            start_date: now,
            end_date: Some(now + Duration::weeks(i64::from(input.duration.weeks()))),
            created_at: now,
            grace_period_ends_at: grace_period_end(now),
        };
        self.storage.insert_commitment(commitment.clone()).await?;

        info!(
            commitment_id = %commitment.id,
            user_id = %user_id,
            stake_cents = commitment.stake_cents,
            "commitment created, awaiting payment"
        );
        Ok(commitment)
    }

    /// Charge the stake. Creates the pending stake transaction and moves the
    /// commitment to `payment_processing`; confirmation arrives later via
    /// [`CommitmentService::confirm_payment`].
    pub async fn begin_payment(
        &self,
        id: &CommitmentId,
        user_id: &UserId,
    ) -> Result<Transaction, CommitmentError> {
        let commitment = self.get_commitment(id, user_id).await?;
        if commitment.status != CommitmentStatus::PendingPayment {
            return Err(CommitmentError::NotAwaitingPayment);
        }

        let customer_ref = self.gateway.get_or_create_customer(user_id).await?;
        let charge = self
            .gateway
            .create_charge(&customer_ref, commitment.stake_cents)
            .await?;

        let tx = Transaction {
            id: TransactionId::generate(),
            user_id: *user_id,
            commitment_id: *id,
            tx_type: TransactionType::Stake,
            status: TransactionStatus::Pending,
            gateway_ref: charge.id,
            gateway_customer_ref: Some(customer_ref),
            amount_cents: commitment.stake_cents,
            created_at: self.clock.now(),
        };
        self.storage.insert_transaction(tx.clone()).await?;

        self.storage
            .transition_commitment(
                id,
                CommitmentStatus::PendingPayment,
                CommitmentStatus::PaymentProcessing,
            )
            .await?;

        info!(commitment_id = %id, gateway_ref = %tx.gateway_ref, "stake charge created");
        Ok(tx)
    }

    /// Stake payment confirmed by the gateway: mark the transaction
    /// succeeded, move the money into escrow, activate the commitment.
    pub async fn confirm_payment(&self, gateway_ref: &str) -> Result<(), CommitmentError> {
        let tx = self
            .storage
            .set_transaction_status(gateway_ref, TransactionStatus::Succeeded)
            .await?;
        self.escrow.add_stake(tx.amount_cents).await?;

        self.storage
            .transition_commitment(
                &tx.commitment_id,
                CommitmentStatus::PaymentProcessing,
                CommitmentStatus::Active,
            )
            .await?;

        info!(commitment_id = %tx.commitment_id, gateway_ref, "commitment activated after payment");
        Ok(())
    }

    /// Stake payment failed: record it and put the commitment back in
    /// `pending_payment` so the owner can retry.
    pub async fn fail_payment(&self, gateway_ref: &str) -> Result<(), CommitmentError> {
        let tx = self
            .storage
            .set_transaction_status(gateway_ref, TransactionStatus::Failed)
            .await?;

        self.storage
            .transition_commitment(
                &tx.commitment_id,
                CommitmentStatus::PaymentProcessing,
                CommitmentStatus::PendingPayment,
            )
            .await?;

        warn!(commitment_id = %tx.commitment_id, gateway_ref, "stake payment failed, reverted to pending");
        Ok(())
    }

    /// What cancelling now would cost, without doing it.
    pub async fn cancel_preview(
        &self,
        id: &CommitmentId,
        user_id: &UserId,
    ) -> Result<CancelPreview, CommitmentError> {
        let commitment = self.get_commitment(id, user_id).await?;
        validate_cancellable(&commitment)?;
        let refundable = self.is_refundable(&commitment);

        Ok(CancelPreview {
            commitment_id: commitment.id,
            refundable,
            forfeit_cents: if refundable { 0 } else { commitment.stake_cents },
            stake_cents: commitment.stake_cents,
            grace_period_ends_at: commitment.grace_period_ends_at,
        })
    }

    /// Cancel a commitment.
    ///
    /// Before anything is staked this is free. With a successful stake,
    /// cancellation inside the grace period refunds it (settling
    /// asynchronously through [`CommitmentService::settle_refund`]); after
    /// the grace period the full stake is forfeited.
    pub async fn cancel_commitment(
        &self,
        id: &CommitmentId,
        user_id: &UserId,
    ) -> Result<CancelOutcome, CommitmentError> {
        let commitment = self.get_commitment(id, user_id).await?;
        validate_cancellable(&commitment)?;

        if commitment.status == CommitmentStatus::PendingPayment {
            self.storage
                .transition_commitment(id, commitment.status, CommitmentStatus::Cancelled)
                .await?;
            info!(commitment_id = %id, "commitment cancelled before payment");
            return Ok(CancelOutcome::FreeCancel);
        }

        let stake = self
            .storage
            .find_stake_for_commitment(id)
            .await?
            .filter(|tx| tx.status == TransactionStatus::Succeeded);
        let Some(stake) = stake else {
            // Charge never succeeded, nothing to move.
            self.storage
                .transition_commitment(id, commitment.status, CommitmentStatus::Cancelled)
                .await?;
            info!(commitment_id = %id, "commitment cancelled, no successful stake");
            return Ok(CancelOutcome::FreeCancel);
        };

        if self.is_refundable(&commitment) {
            let refund = self.gateway.create_refund(&stake.gateway_ref).await?;
            self.storage
                .insert_transaction(Transaction {
                    id: TransactionId::generate(),
                    user_id: *user_id,
                    commitment_id: *id,
                    tx_type: TransactionType::Refund,
                    status: TransactionStatus::Pending,
                    gateway_ref: refund.id.clone(),
                    gateway_customer_ref: stake.gateway_customer_ref.clone(),
                    amount_cents: stake.amount_cents,
                    created_at: self.clock.now(),
                })
                .await?;
            self.storage
                .transition_commitment(id, commitment.status, CommitmentStatus::RefundPending)
                .await?;

            info!(commitment_id = %id, refund_ref = %refund.id, "grace period cancel, refund pending");
            return Ok(CancelOutcome::RefundPending { refund_ref: refund.id });
        }

        let split = self.escrow.record_forfeit(&commitment, &stake).await?;
        self.storage
            .transition_commitment(id, commitment.status, CommitmentStatus::Forfeited)
            .await?;

        info!(
            commitment_id = %id,
            rake_cents = split.rake_cents,
            pool_cents = split.pool_cents,
            "late cancel, stake forfeited"
        );
        Ok(CancelOutcome::Forfeited(split))
    }

    /// Refund settled at the gateway: release the money from escrow and
    /// finalize the cancellation. Idempotent; replays return `false`.
    pub async fn settle_refund(&self, refund_ref: &str) -> Result<bool, CommitmentError> {
        let Some(tx) = self.storage.get_transaction_by_gateway_ref(refund_ref).await? else {
            warn!(refund_ref, "no refund transaction for settlement event");
            return Ok(false);
        };
        if tx.status == TransactionStatus::Succeeded {
            info!(refund_ref, "refund already settled, skipping");
            return Ok(false);
        }

        self.storage
            .set_transaction_status(refund_ref, TransactionStatus::Succeeded)
            .await?;
        self.escrow.subtract_refund(tx.amount_cents).await?;
        self.storage
            .transition_commitment(
                &tx.commitment_id,
                CommitmentStatus::RefundPending,
                CommitmentStatus::CancelledRefunded,
            )
            .await?;

        info!(
            refund_ref,
            commitment_id = %tx.commitment_id,
            amount_cents = tx.amount_cents,
            "refund settled"
        );
        Ok(true)
    }

    /// Completion check, run after every verification success.
    ///
    /// Fail-closed: a single failed verification blocks completion even when
    /// the count requirement is met. The `active → completed` transition is
    /// a compare-and-swap, so two concurrent qualifying verifications settle
    /// exactly one payout. If the payout itself fails the transition is
    /// rolled back and the error propagates as retryable.
    pub async fn check_completion(
        &self,
        id: &CommitmentId,
    ) -> Result<CompletionCheck, CommitmentError> {
        let commitment = self
            .storage
            .get_commitment(id)
            .await?
            .ok_or(CommitmentError::NotFound)?;

        let required = commitment.required_sessions();
        let verified = self
            .storage
            .count_sessions_with_verification(id, VerificationStatus::Succeeded)
            .await?;
        if verified < required {
            return Ok(CompletionCheck::NotReady { verified, required });
        }

        let failed_sessions = self
            .storage
            .count_sessions_with_verification(id, VerificationStatus::Failed)
            .await?;
        if failed_sessions > 0 {
            warn!(
                commitment_id = %id,
                failed_sessions,
                "completion blocked by failed verification"
            );
            return Ok(CompletionCheck::Blocked { failed_sessions });
        }

        // Claim the completion. Losing the race is not an error.
        match self
            .storage
            .transition_commitment(id, CommitmentStatus::Active, CommitmentStatus::Completed)
            .await
        {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Ok(CompletionCheck::AlreadySettled),
            Err(other) => return Err(other.into()),
        }

        match self.payouts.issue_completion_payout(&commitment).await {
            Ok(result) => {
                info!(commitment_id = %id, "commitment completed");
                Ok(CompletionCheck::Completed(result))
            }
            Err(err) => {
                // Give the claim back so a retry can settle the payout.
                if let Err(rollback) = self
                    .storage
                    .transition_commitment(id, CommitmentStatus::Completed, CommitmentStatus::Active)
                    .await
                {
                    warn!(commitment_id = %id, error = %rollback, "completion rollback failed");
                }
                Err(err.into())
            }
        }
    }

    /// Forfeit an expired, unfulfilled commitment. Used by the sweeper;
    /// shares the forfeit path with late cancellation.
    pub async fn forfeit_expired(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<ForfeitSplit>, CommitmentError> {
        let required = commitment.required_sessions();
        let verified = self
            .storage
            .count_sessions_with_verification(&commitment.id, VerificationStatus::Succeeded)
            .await?;
        if verified >= required {
            info!(
                commitment_id = %commitment.id,
                verified,
                required,
                "expired commitment already fulfilled, skipping forfeit"
            );
            return Ok(None);
        }

        let stake = self
            .storage
            .find_stake_for_commitment(&commitment.id)
            .await?
            .filter(|tx| tx.status == TransactionStatus::Succeeded);
        let Some(stake) = stake else {
            warn!(commitment_id = %commitment.id, "no successful stake, skipping forfeit");
            return Ok(None);
        };

        let split = self.escrow.record_forfeit(commitment, &stake).await?;
        self.storage
            .transition_commitment(
                &commitment.id,
                CommitmentStatus::Active,
                CommitmentStatus::Forfeited,
            )
            .await?;

        info!(
            commitment_id = %commitment.id,
            user_id = %commitment.user_id,
            stake_cents = commitment.stake_cents,
            rake_cents = split.rake_cents,
            verified,
            required,
            "expired commitment forfeited"
        );
        Ok(Some(split))
    }

    fn is_refundable(&self, commitment: &Commitment) -> bool {
        self.clock.now() < commitment.grace_period_ends_at
    }
}

/// Expected forfeiture split for a stake, exposed for previews.
pub fn preview_forfeit(stake_cents: i64) -> ForfeitSplit {
    split_forfeit(stake_cents)
}

fn validate_cancellable(commitment: &Commitment) -> Result<(), CommitmentError> {
    match commitment.status {
        CommitmentStatus::Cancelled | CommitmentStatus::CancelledRefunded => {
            Err(CommitmentError::AlreadyCancelled)
        }
        CommitmentStatus::Completed => Err(CommitmentError::AlreadyCompleted),
        CommitmentStatus::Forfeited => Err(CommitmentError::AlreadyForfeited),
        CommitmentStatus::RefundPending => Err(CommitmentError::RefundAlreadyPending),
        CommitmentStatus::PendingPayment
        | CommitmentStatus::PaymentProcessing
        | CommitmentStatus::Active => Ok(()),
    }
}
