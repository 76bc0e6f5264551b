//! Escrow accounting for staked commitments.
//!
//! Money enters the pool when a stake is captured, and leaves it exactly one
//! of three ways: refunded during the grace period, paid back out on
//! completion, or forfeited. A forfeiture is split between the bonus pool
//! and the platform rake at [`RAKE_RATE`].

#![deny(unsafe_code)]

use chrono::Utc;
use std::sync::Arc;
use stride_storage::{ForfeitApply, StorageError, StrideStorage};
use stride_types::{
    Commitment, Pool, Transaction, TransactionId, TransactionStatus, TransactionType,
};
use thiserror::Error;
use tracing::info;

/// Platform share of every forfeited stake.
pub const RAKE_RATE: f64 = 0.20;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("storage error in escrow accounting: {0}")]
    Storage(#[from] StorageError),
}

/// How a forfeited stake divides between platform and pool. The two parts
/// always sum to the stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForfeitSplit {
    pub rake_cents: i64,
    pub pool_cents: i64,
}

/// Split a forfeited stake. Rake is rounded to the nearest cent; the pool
/// takes the remainder, so no cent is ever lost to rounding.
pub fn split_forfeit(stake_cents: i64) -> ForfeitSplit {
    let rake_cents = (stake_cents as f64 * RAKE_RATE).round() as i64;
    ForfeitSplit {
        rake_cents,
        pool_cents: stake_cents - rake_cents,
    }
}

/// Service wrapping all pool mutations. Every write goes through the
/// storage layer's atomic increments; this service never reads, computes,
/// and writes the pool row itself.
pub struct EscrowService {
    storage: Arc<dyn StrideStorage>,
}

impl EscrowService {
    pub fn new(storage: Arc<dyn StrideStorage>) -> Self {
        Self { storage }
    }

    pub async fn pool_snapshot(&self) -> Result<Pool, EscrowError> {
        Ok(self.storage.fetch_pool().await?)
    }

    /// A captured stake enters escrow.
    pub async fn add_stake(&self, cents: i64) -> Result<(), EscrowError> {
        self.storage.pool_add_stake(cents).await?;
        info!(cents, "stake added to escrow");
        Ok(())
    }

    /// Forfeit a commitment's stake: split it, write both audit
    /// transactions, and move the money in a single storage call.
    ///
    /// Idempotent per commitment. The audit transactions carry references
    /// derived from the commitment id, so a second attempt hits the unique
    /// constraint and fails with a storage conflict instead of double
    /// counting.
    pub async fn record_forfeit(
        &self,
        commitment: &Commitment,
        stake: &Transaction,
    ) -> Result<ForfeitSplit, EscrowError> {
        let split = split_forfeit(commitment.stake_cents);
        let now = Utc::now();

        let forfeit_tx = Transaction {
            id: TransactionId::generate(),
            user_id: commitment.user_id,
            commitment_id: commitment.id,
            tx_type: TransactionType::Forfeit,
            status: TransactionStatus::Succeeded,
            gateway_ref: format!("forfeit_{}", commitment.id),
            gateway_customer_ref: stake.gateway_customer_ref.clone(),
            amount_cents: commitment.stake_cents,
            created_at: now,
        };
        let rake_tx = Transaction {
            id: TransactionId::generate(),
            user_id: commitment.user_id,
            commitment_id: commitment.id,
            tx_type: TransactionType::Rake,
            status: TransactionStatus::Succeeded,
            gateway_ref: format!("rake_{}", commitment.id),
            gateway_customer_ref: stake.gateway_customer_ref.clone(),
            amount_cents: split.rake_cents,
            created_at: now,
        };

        self.storage
            .pool_apply_forfeit(ForfeitApply {
                stake_cents: commitment.stake_cents,
                rake_cents: split.rake_cents,
                pool_cents: split.pool_cents,
                forfeit_tx,
                rake_tx,
            })
            .await?;

        info!(
            commitment_id = %commitment.id,
            stake_cents = commitment.stake_cents,
            rake_cents = split.rake_cents,
            pool_cents = split.pool_cents,
            "forfeiture recorded"
        );
        Ok(split)
    }

    /// A grace-period refund leaves escrow.
    pub async fn subtract_refund(&self, cents: i64) -> Result<(), EscrowError> {
        self.storage.pool_subtract_refund(cents).await?;
        info!(cents, "refund subtracted from escrow");
        Ok(())
    }

    /// A completion payout leaves escrow. Bonus subtraction is carried
    /// separately so the accounting survives bonuses becoming nonzero.
    pub async fn subtract_payout(
        &self,
        stake_cents: i64,
        bonus_cents: i64,
    ) -> Result<(), EscrowError> {
        self.storage.pool_subtract_payout(stake_cents, bonus_cents).await?;
        info!(stake_cents, bonus_cents, "payout subtracted from escrow");
        Ok(())
    }
}
