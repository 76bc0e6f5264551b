//! End-to-end money lifecycle: staking, cancellation, completion, payout.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use stride_commitments::{
    CancelOutcome, CommitmentError, CommitmentService, CompletionCheck, CreateCommitment,
    PayoutError,
};
use stride_escrow::EscrowService;
use stride_payments::{MockGateway, PaymentError};
use stride_sessions::{
    SchedulerError, SessionService, VerificationJob, VerificationScheduler, VerificationWriteBack,
};
use stride_storage::{InMemoryStrideStorage, TransactionStore};
use stride_types::{
    ActivityType, Commitment, CommitmentDuration, CommitmentStatus, ManualClock, SessionGoal,
    TransactionStatus, TransactionType, UserId, WorkoutFrequency,
};

struct NoopScheduler;

#[async_trait]
impl VerificationScheduler for NoopScheduler {
    async fn enqueue_verification(&self, _job: VerificationJob) -> Result<(), SchedulerError> {
        Ok(())
    }
}

struct Harness {
    storage: Arc<InMemoryStrideStorage>,
    clock: Arc<ManualClock>,
    gateway: Arc<MockGateway>,
    escrow: Arc<EscrowService>,
    commitments: CommitmentService,
    sessions: SessionService,
}

fn harness() -> Harness {
    let storage = Arc::new(InMemoryStrideStorage::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let gateway = Arc::new(MockGateway::new());
    let escrow = Arc::new(EscrowService::new(storage.clone()));
    let commitments = CommitmentService::new(
        storage.clone(),
        clock.clone(),
        gateway.clone(),
        escrow.clone(),
    );
    let sessions = SessionService::new(storage.clone(), clock.clone(), Arc::new(NoopScheduler));
    Harness { storage, clock, gateway, escrow, commitments, sessions }
}

fn walk_input(stake_cents: i64) -> CreateCommitment {
    CreateCommitment {
        activity: ActivityType::Walk,
        frequency: WorkoutFrequency::ThreeTimesAWeek,
        duration: CommitmentDuration::OneWeeks,
        session_goal: SessionGoal::Steps,
        stake_cents,
    }
}

/// Create, charge, and confirm a commitment into `active`.
async fn activated_commitment(h: &Harness, user: &UserId, stake_cents: i64) -> Commitment {
    let commitment = h.commitments.create_commitment(user, walk_input(stake_cents)).await.unwrap();
    let stake_tx = h.commitments.begin_payment(&commitment.id, user).await.unwrap();
    h.commitments.confirm_payment(&stake_tx.gateway_ref).await.unwrap();
    h.commitments.get_commitment(&commitment.id, user).await.unwrap()
}

/// Run one session through create → complete → verification success.
/// Advances the clock a day so each session lands on its own counting day.
async fn verified_session(h: &Harness, user: &UserId, commitment: &Commitment) {
    let session = h.sessions.create_session(user, &commitment.id, "UTC").await.unwrap();
    h.sessions.complete_session(&session.id, user).await.unwrap();
    h.sessions
        .apply_verification_result(
            &session.id,
            VerificationWriteBack {
                passed: true,
                fraud_detected: false,
                flagged_for_review: false,
                review_notes: None,
                actual_value: 2_500.0,
                session_duration_secs: 1_800.0,
            },
        )
        .await
        .unwrap();
    h.clock.advance(Duration::days(1));
}

#[tokio::test]
async fn stake_validation_and_single_in_flight_rule() {
    let h = harness();
    let user = UserId::generate();

    assert!(matches!(
        h.commitments.create_commitment(&user, walk_input(49)).await,
        Err(CommitmentError::InvalidStake(49))
    ));
    assert!(matches!(
        h.commitments.create_commitment(&user, walk_input(10_001)).await,
        Err(CommitmentError::InvalidStake(10_001))
    ));

    h.commitments.create_commitment(&user, walk_input(1_000)).await.unwrap();
    assert!(matches!(
        h.commitments.create_commitment(&user, walk_input(1_000)).await,
        Err(CommitmentError::ActiveCommitmentExists)
    ));
}

#[tokio::test]
async fn payment_confirmation_activates_and_funds_escrow() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    assert_eq!(commitment.status, CommitmentStatus::Active);
    let pool = h.escrow.pool_snapshot().await.unwrap();
    assert_eq!(pool.stakes_held_cents, 1_000);

    let stake = h.storage.find_stake_for_commitment(&commitment.id).await.unwrap().unwrap();
    assert_eq!(stake.status, TransactionStatus::Succeeded);
}

#[tokio::test]
async fn failed_payment_reverts_to_pending() {
    let h = harness();
    let user = UserId::generate();
    let commitment = h.commitments.create_commitment(&user, walk_input(1_000)).await.unwrap();
    let stake_tx = h.commitments.begin_payment(&commitment.id, &user).await.unwrap();

    h.commitments.fail_payment(&stake_tx.gateway_ref).await.unwrap();

    let commitment = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(commitment.status, CommitmentStatus::PendingPayment);

    // Double charge attempt is blocked while not awaiting payment.
    h.commitments.begin_payment(&commitment.id, &user).await.unwrap();
    assert!(matches!(
        h.commitments.begin_payment(&commitment.id, &user).await,
        Err(CommitmentError::NotAwaitingPayment)
    ));
}

#[tokio::test]
async fn cancel_before_payment_is_free() {
    let h = harness();
    let user = UserId::generate();
    let commitment = h.commitments.create_commitment(&user, walk_input(1_000)).await.unwrap();

    let outcome = h.commitments.cancel_commitment(&commitment.id, &user).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::FreeCancel));

    let commitment = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(commitment.status, CommitmentStatus::Cancelled);

    assert!(matches!(
        h.commitments.cancel_commitment(&commitment.id, &user).await,
        Err(CommitmentError::AlreadyCancelled)
    ));
}

#[tokio::test]
async fn cancel_within_grace_refunds_and_settles_once() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    let preview = h.commitments.cancel_preview(&commitment.id, &user).await.unwrap();
    assert!(preview.refundable);
    assert_eq!(preview.forfeit_cents, 0);

    let outcome = h.commitments.cancel_commitment(&commitment.id, &user).await.unwrap();
    let CancelOutcome::RefundPending { refund_ref } = outcome else {
        panic!("expected refund, got {outcome:?}");
    };

    let pending = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(pending.status, CommitmentStatus::RefundPending);

    assert!(h.commitments.settle_refund(&refund_ref).await.unwrap());
    let settled = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(settled.status, CommitmentStatus::CancelledRefunded);
    let pool = h.escrow.pool_snapshot().await.unwrap();
    assert_eq!(pool.stakes_held_cents, 0);

    // Replayed settlement event is a no-op.
    assert!(!h.commitments.settle_refund(&refund_ref).await.unwrap());
    let pool = h.escrow.pool_snapshot().await.unwrap();
    assert_eq!(pool.stakes_held_cents, 0);
}

#[tokio::test]
async fn cancel_after_grace_forfeits_the_stake() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    h.clock.advance(Duration::days(2));

    let preview = h.commitments.cancel_preview(&commitment.id, &user).await.unwrap();
    assert!(!preview.refundable);
    assert_eq!(preview.forfeit_cents, 1_000);

    let outcome = h.commitments.cancel_commitment(&commitment.id, &user).await.unwrap();
    let CancelOutcome::Forfeited(split) = outcome else {
        panic!("expected forfeit, got {outcome:?}");
    };
    assert_eq!(split.rake_cents, 200);
    assert_eq!(split.pool_cents, 800);

    let forfeited = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(forfeited.status, CommitmentStatus::Forfeited);

    let pool = h.escrow.pool_snapshot().await.unwrap();
    assert_eq!(pool.stakes_held_cents, 0);
    assert_eq!(pool.balance_cents, 800);
    assert_eq!(pool.total_rake_cents, 200);

    let txs = h.storage.list_transactions_by_commitment(&commitment.id).await.unwrap();
    let forfeit = txs.iter().find(|t| t.tx_type == TransactionType::Forfeit).unwrap();
    let rake = txs.iter().find(|t| t.tx_type == TransactionType::Rake).unwrap();
    assert_eq!(forfeit.amount_cents, 1_000);
    assert_eq!(rake.amount_cents, 200);
    assert_eq!(forfeit.status, TransactionStatus::Succeeded);
    assert_eq!(rake.status, TransactionStatus::Succeeded);
}

#[tokio::test]
async fn completion_requires_the_full_session_count() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    verified_session(&h, &user, &commitment).await;
    verified_session(&h, &user, &commitment).await;

    let check = h.commitments.check_completion(&commitment.id).await.unwrap();
    assert!(matches!(check, CompletionCheck::NotReady { verified: 2, required: 3 }));
}

#[tokio::test]
async fn completion_pays_out_exactly_once() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    for _ in 0..3 {
        verified_session(&h, &user, &commitment).await;
    }

    let first = h.commitments.check_completion(&commitment.id).await.unwrap();
    let CompletionCheck::Completed(payout) = first else {
        panic!("expected completion, got {first:?}");
    };
    assert_eq!(payout.stake_returned_cents, 1_000);
    assert_eq!(payout.bonus_awarded_cents, 0);
    assert_eq!(payout.total_cents, 1_000);

    // A concurrent qualifying verification observing the same counts loses
    // the compare-and-swap and must not pay again.
    let second = h.commitments.check_completion(&commitment.id).await.unwrap();
    assert!(matches!(second, CompletionCheck::AlreadySettled));

    let txs = h.storage.list_transactions_by_commitment(&commitment.id).await.unwrap();
    let payouts: Vec<_> = txs.iter().filter(|t| t.tx_type == TransactionType::Payout).collect();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount_cents, 1_000);

    let pool = h.escrow.pool_snapshot().await.unwrap();
    assert_eq!(pool.stakes_held_cents, 0);
}

#[tokio::test]
async fn one_failed_verification_blocks_completion() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    // A fraudulent session first.
    let session = h.sessions.create_session(&user, &commitment.id, "UTC").await.unwrap();
    h.sessions.complete_session(&session.id, &user).await.unwrap();
    h.sessions
        .apply_verification_result(
            &session.id,
            VerificationWriteBack {
                passed: false,
                fraud_detected: true,
                flagged_for_review: false,
                review_notes: Some("[gps_teleportation] impossible speed".to_string()),
                actual_value: 0.0,
                session_duration_secs: 900.0,
            },
        )
        .await
        .unwrap();
    h.clock.advance(Duration::days(1));

    for _ in 0..3 {
        verified_session(&h, &user, &commitment).await;
    }

    let check = h.commitments.check_completion(&commitment.id).await.unwrap();
    assert!(matches!(check, CompletionCheck::Blocked { failed_sessions: 1 }));

    let commitment = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(commitment.status, CommitmentStatus::Active);
}

#[tokio::test]
async fn payout_failure_rolls_back_and_is_retryable() {
    let h = harness();
    let user = UserId::generate();
    let commitment = activated_commitment(&h, &user, 1_000).await;

    for _ in 0..3 {
        verified_session(&h, &user, &commitment).await;
    }

    h.gateway.fail_next_refund();
    let attempt = h.commitments.check_completion(&commitment.id).await;
    assert!(matches!(
        attempt,
        Err(CommitmentError::Payout(PayoutError::Gateway(PaymentError::Unavailable(_))))
    ));

    // The claim was released, so a retry settles the payout.
    let still_active = h.commitments.get_commitment(&commitment.id, &user).await.unwrap();
    assert_eq!(still_active.status, CommitmentStatus::Active);

    let retry = h.commitments.check_completion(&commitment.id).await.unwrap();
    assert!(matches!(retry, CompletionCheck::Completed(_)));
}
