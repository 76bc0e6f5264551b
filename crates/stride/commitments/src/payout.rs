//! Completion payouts.
//!
//! Kept apart from the commitment service because a payout touches the
//! gateway, the transaction log, and the pool, and the flow will grow when
//! bonuses are introduced. Today a payout is a full refund of the original
//! stake charge; bonuses always compute to zero.

use chrono::Utc;
use std::sync::Arc;
use stride_escrow::EscrowService;
use stride_payments::{PaymentError, PaymentGateway};
use stride_storage::{StorageError, StrideStorage};
use stride_types::{
    Commitment, CommitmentId, Transaction, TransactionId, TransactionStatus, TransactionType,
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("no successful stake found for this commitment")]
    NoSuccessfulStake,

    /// Gateway refund failed after the commitment was otherwise eligible.
    /// Retryable; nothing has been written when this is returned.
    #[error("payout via gateway failed: {0}")]
    Gateway(#[from] PaymentError),

    #[error("storage error during payout: {0}")]
    Storage(#[from] StorageError),

    #[error("escrow error during payout: {0}")]
    Escrow(#[from] stride_escrow::EscrowError),
}

#[derive(Clone, Debug)]
pub struct PayoutResult {
    pub commitment_id: CommitmentId,
    pub stake_returned_cents: i64,
    pub bonus_awarded_cents: i64,
    pub total_cents: i64,
    pub gateway_ref: String,
}

pub struct PayoutService {
    storage: Arc<dyn StrideStorage>,
    gateway: Arc<dyn PaymentGateway>,
    escrow: Arc<EscrowService>,
}

impl PayoutService {
    pub fn new(
        storage: Arc<dyn StrideStorage>,
        gateway: Arc<dyn PaymentGateway>,
        escrow: Arc<EscrowService>,
    ) -> Self {
        Self { storage, gateway, escrow }
    }

    /// Return the stake for a fulfilled commitment: refund the original
    /// charge, record the payout transaction, release the money from escrow.
    pub async fn issue_completion_payout(
        &self,
        commitment: &Commitment,
    ) -> Result<PayoutResult, PayoutError> {
        let stake = self
            .storage
            .find_stake_for_commitment(&commitment.id)
            .await?
            .filter(|tx| tx.status == TransactionStatus::Succeeded)
            .ok_or_else(|| {
                error!(commitment_id = %commitment.id, "cannot pay out, no successful stake");
                PayoutError::NoSuccessfulStake
            })?;

        let stake_returned = commitment.stake_cents;
        let bonus_awarded = calculate_bonus(commitment);
        let total = stake_returned + bonus_awarded;

        let refund = self.gateway.create_refund(&stake.gateway_ref).await?;

        self.storage
            .insert_transaction(Transaction {
                id: TransactionId::generate(),
                user_id: commitment.user_id,
                commitment_id: commitment.id,
                tx_type: TransactionType::Payout,
                status: TransactionStatus::Succeeded,
                gateway_ref: refund.id.clone(),
                gateway_customer_ref: stake.gateway_customer_ref.clone(),
                amount_cents: total,
                created_at: Utc::now(),
            })
            .await?;

        self.escrow.subtract_payout(stake_returned, bonus_awarded).await?;

        info!(
            commitment_id = %commitment.id,
            stake_returned,
            bonus_awarded,
            total,
            gateway_ref = %refund.id,
            "completion payout issued"
        );

        Ok(PayoutResult {
            commitment_id: commitment.id,
            stake_returned_cents: stake_returned,
            bonus_awarded_cents: bonus_awarded,
            total_cents: total,
            gateway_ref: refund.id,
        })
    }
}

/// Bonus for a completed commitment. Always zero until pool-funded bonuses
/// ship; the call sites already carry the amount separately so the rollout
/// only changes this function.
fn calculate_bonus(_commitment: &Commitment) -> i64 {
    0
}
