//! Commitment lifecycle for Stride.
//!
//! A commitment is created in `pending_payment`, activates when its stake
//! charge settles, and ends completed, forfeited, or cancelled. Money moves
//! through the escrow crate; this crate owns the state machine and the
//! completion/payout orchestration.

#![deny(unsafe_code)]

mod error;
mod payout;
mod service;

pub use error::CommitmentError;
pub use payout::{PayoutError, PayoutResult, PayoutService};
pub use service::{
    preview_forfeit, CancelOutcome, CancelPreview, CommitmentService, CompletionCheck,
    CreateCommitment,
};
