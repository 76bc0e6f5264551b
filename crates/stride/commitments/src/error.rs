use stride_escrow::EscrowError;
use stride_payments::PaymentError;
use stride_storage::StorageError;
use thiserror::Error;

use crate::payout::PayoutError;

/// Commitment-level failures, one variant per named guard.
#[derive(Debug, Error)]
pub enum CommitmentError {
    #[error("commitment not found")]
    NotFound,

    #[error("commitment belongs to another user")]
    Unauthorized,

    #[error("user already has a commitment in flight")]
    ActiveCommitmentExists,

    #[error("stake amount {0} cents is outside the allowed range")]
    InvalidStake(i64),

    #[error("commitment is already cancelled")]
    AlreadyCancelled,

    #[error("commitment is already completed")]
    AlreadyCompleted,

    #[error("commitment is already forfeited")]
    AlreadyForfeited,

    #[error("a refund for this commitment is already pending")]
    RefundAlreadyPending,

    #[error("commitment is not awaiting payment")]
    NotAwaitingPayment,

    #[error("payment gateway error: {0}")]
    Payment(#[from] PaymentError),

    #[error("escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Payout(#[from] PayoutError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
