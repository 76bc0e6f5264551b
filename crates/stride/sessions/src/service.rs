//! Session lifecycle service.
//!
//! Every mutation re-reads the session, checks the transition guard, and only
//! then writes. Guards fail before any mutation, so an illegal call never
//! leaves a partial transition behind.

use crate::error::SessionError;
use crate::scheduler::{VerificationJob, VerificationScheduler};
use std::sync::Arc;
use stride_storage::StrideStorage;
use stride_types::{
    counting_day, Clock, CommitmentId, CommitmentStatus, Session, SessionId, SessionStatus,
    UserId, VerificationStatus,
};
use tracing::info;

/// Verification verdict written back onto a session once the pipeline has
/// run. Mirrors the engine's outcome without depending on it.
#[derive(Clone, Debug)]
pub struct VerificationWriteBack {
    pub passed: bool,
    pub fraud_detected: bool,
    pub flagged_for_review: bool,
    pub review_notes: Option<String>,
    pub actual_value: f64,
    pub session_duration_secs: f64,
}

pub struct SessionService {
    storage: Arc<dyn StrideStorage>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn VerificationScheduler>,
}

impl SessionService {
    pub fn new(
        storage: Arc<dyn StrideStorage>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn VerificationScheduler>,
    ) -> Self {
        Self { storage, clock, scheduler }
    }

    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, SessionError> {
        Ok(self.storage.list_sessions_by_user(user_id).await?)
    }

    /// Fetch a session, distinguishing "does not exist" from "not yours".
    pub async fn get_session(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<Session, SessionError> {
        let session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if session.user_id != *user_id {
            return Err(SessionError::Unauthorized);
        }
        Ok(session)
    }

    /// Start a session against an active commitment.
    ///
    /// Three guards, in order: the commitment must be active, the commitment
    /// must have no in-progress or paused session, and the (commitment,
    /// counting day) slot must be free. The last one is enforced by the
    /// storage unique constraint and translated to
    /// [`SessionError::SessionAlreadyExistsForDay`].
    pub async fn create_session(
        &self,
        user_id: &UserId,
        commitment_id: &CommitmentId,
        timezone: &str,
    ) -> Result<Session, SessionError> {
        let commitment = self
            .storage
            .get_commitment(commitment_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if commitment.user_id != *user_id {
            return Err(SessionError::Unauthorized);
        }
        if commitment.status != CommitmentStatus::Active {
            return Err(SessionError::CommitmentNotActive);
        }
        if self.storage.find_active_session(commitment_id).await?.is_some() {
            return Err(SessionError::ActiveSessionExists);
        }

        let now = self.clock.now();
        let day = counting_day(now, timezone)
            .map_err(|_| SessionError::InvalidTimezone(timezone.to_string()))?;

        let session = Session {
            id: SessionId::generate(),
            user_id: *user_id,
            commitment_id: *commitment_id,
            timezone: timezone.to_string(),
            counting_day: day,
            start_date: now,
            end_date: None,
            created_at: now,
            completed_at: None,
            session_duration_secs: 0.0,
            status: SessionStatus::InProgress,
            verification_status: VerificationStatus::NotStarted,
            session_goal: commitment.session_goal,
            actual_value: None,
            flagged_for_review: false,
            fraud_detected: false,
            review_notes: None,
        };
        self.storage.insert_session(session.clone()).await?;

        info!(
            session_id = %session.id,
            commitment_id = %commitment_id,
            counting_day = %day,
            "session started"
        );
        Ok(session)
    }

    pub async fn pause_session(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<Session, SessionError> {
        let mut session = self.get_session(id, user_id).await?;
        match session.status {
            SessionStatus::InProgress => {}
            SessionStatus::Paused => return Err(SessionError::AlreadyPaused),
            SessionStatus::Completed => return Err(SessionError::AlreadyCompleted),
            SessionStatus::Cancelled => return Err(SessionError::AlreadyCancelled),
            SessionStatus::NotStarted => return Err(SessionError::NotInProgress),
        }
        session.status = SessionStatus::Paused;
        self.storage.update_session(session.clone()).await?;
        Ok(session)
    }

    pub async fn resume_session(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<Session, SessionError> {
        let mut session = self.get_session(id, user_id).await?;
        match session.status {
            SessionStatus::Paused => {}
            SessionStatus::Completed => return Err(SessionError::AlreadyCompleted),
            SessionStatus::Cancelled => return Err(SessionError::AlreadyCancelled),
            SessionStatus::InProgress | SessionStatus::NotStarted => {
                return Err(SessionError::NotPaused)
            }
        }
        session.status = SessionStatus::InProgress;
        self.storage.update_session(session.clone()).await?;
        Ok(session)
    }

    /// Complete a session: end timestamp set, verification moves to pending.
    /// Verification itself is requested separately.
    pub async fn complete_session(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<Session, SessionError> {
        let mut session = self.get_session(id, user_id).await?;
        match session.status {
            SessionStatus::InProgress => {}
            SessionStatus::Paused => return Err(SessionError::PausedResumeFirst),
            SessionStatus::Completed => return Err(SessionError::AlreadyCompleted),
            SessionStatus::Cancelled => return Err(SessionError::AlreadyCancelled),
            SessionStatus::NotStarted => return Err(SessionError::NotInProgress),
        }

        let now = self.clock.now();
        session.status = SessionStatus::Completed;
        session.end_date = Some(now);
        session.completed_at = Some(now);
        session.verification_status = VerificationStatus::Pending;
        self.storage.update_session(session.clone()).await?;

        info!(session_id = %session.id, "session completed, verification pending");
        Ok(session)
    }

    /// Cancel a session. Cancelled sessions are excluded from the per-day
    /// uniqueness constraint, so the day slot opens up again.
    pub async fn cancel_session(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<Session, SessionError> {
        let mut session = self.get_session(id, user_id).await?;
        match session.status {
            SessionStatus::InProgress | SessionStatus::Paused => {}
            SessionStatus::Completed => return Err(SessionError::AlreadyCompleted),
            SessionStatus::Cancelled => return Err(SessionError::AlreadyCancelled),
            SessionStatus::NotStarted => return Err(SessionError::NotInProgress),
        }
        session.status = SessionStatus::Cancelled;
        self.storage.update_session(session.clone()).await?;

        info!(session_id = %session.id, "session cancelled");
        Ok(session)
    }

    /// Enqueue the completed session for asynchronous verification. The
    /// queue deduplicates by session id, so repeat requests are no-ops.
    pub async fn request_verification(
        &self,
        id: &SessionId,
        user_id: &UserId,
    ) -> Result<(), SessionError> {
        let session = self.get_session(id, user_id).await?;
        if session.status != SessionStatus::Completed
            || session.verification_status != VerificationStatus::Pending
        {
            return Err(SessionError::VerificationNotPending);
        }

        let commitment = self
            .storage
            .get_commitment(&session.commitment_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        self.scheduler
            .enqueue_verification(VerificationJob {
                session: session.clone(),
                activity: commitment.activity,
            })
            .await
            .map_err(|e| SessionError::Scheduler(e.0))?;

        info!(session_id = %id, "verification requested");
        Ok(())
    }

    /// Write a verification verdict onto the session. Only legal while the
    /// verification is pending; the queue's at-least-once delivery makes a
    /// second write attempt surface here instead of clobbering the verdict.
    pub async fn apply_verification_result(
        &self,
        id: &SessionId,
        verdict: VerificationWriteBack,
    ) -> Result<Session, SessionError> {
        let mut session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if session.verification_status != VerificationStatus::Pending {
            return Err(SessionError::VerificationNotPending);
        }

        session.verification_status = if verdict.passed {
            VerificationStatus::Succeeded
        } else {
            VerificationStatus::Failed
        };
        session.actual_value = Some(verdict.actual_value);
        session.session_duration_secs = verdict.session_duration_secs;
        session.flagged_for_review = verdict.flagged_for_review;
        session.fraud_detected = verdict.fraud_detected;
        session.review_notes = verdict.review_notes;
        if verdict.passed {
            session.completed_at = Some(self.clock.now());
        }
        self.storage.update_session(session.clone()).await?;

        info!(
            session_id = %id,
            verification_status = ?session.verification_status,
            fraud_detected = session.fraud_detected,
            flagged_for_review = session.flagged_for_review,
            "verification verdict recorded"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;
    use stride_storage::{CommitmentStore, InMemoryStrideStorage};
    use stride_types::{
        ActivityType, Commitment, CommitmentDuration, ManualClock, SessionGoal, WorkoutFrequency,
    };

    use crate::scheduler::SchedulerError;

    /// Scheduler double that records enqueued jobs.
    #[derive(Default)]
    struct RecordingScheduler {
        jobs: Mutex<Vec<VerificationJob>>,
    }

    #[async_trait]
    impl VerificationScheduler for RecordingScheduler {
        async fn enqueue_verification(&self, job: VerificationJob) -> Result<(), SchedulerError> {
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }
    }

    struct Harness {
        storage: Arc<InMemoryStrideStorage>,
        clock: Arc<ManualClock>,
        scheduler: Arc<RecordingScheduler>,
        service: SessionService,
    }

    fn harness() -> Harness {
        let storage = Arc::new(InMemoryStrideStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Arc::new(RecordingScheduler::default());
        let service =
            SessionService::new(storage.clone(), clock.clone(), scheduler.clone());
        Harness { storage, clock, scheduler, service }
    }

    async fn active_commitment(h: &Harness, user_id: UserId) -> Commitment {
        let now = h.clock.now();
        let commitment = Commitment {
            id: CommitmentId::generate(),
            user_id,
            activity: ActivityType::Walk,
            frequency: WorkoutFrequency::ThreeTimesAWeek,
            duration: CommitmentDuration::OneWeeks,
            session_goal: SessionGoal::Steps,
            stake_cents: 1_000,
            locked_bonus_cents: 0,
            status: CommitmentStatus::Active,
            start_date: now,
            end_date: Some(now + Duration::weeks(1)),
            created_at: now,
            grace_period_ends_at: now + Duration::days(1),
        };
        h.storage.insert_commitment(commitment.clone()).await.unwrap();
        commitment
    }

    #[tokio::test]
    async fn create_requires_an_active_commitment() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;
        h.storage
            .transition_commitment(
                &commitment.id,
                CommitmentStatus::Active,
                CommitmentStatus::PendingPayment,
            )
            .await
            .unwrap();

        let result = h.service.create_session(&user, &commitment.id, "UTC").await;
        assert!(matches!(result, Err(SessionError::CommitmentNotActive)));
    }

    #[tokio::test]
    async fn create_rejects_other_users_commitments() {
        let h = harness();
        let owner = UserId::generate();
        let commitment = active_commitment(&h, owner).await;

        let stranger = UserId::generate();
        let result = h.service.create_session(&stranger, &commitment.id, "UTC").await;
        assert!(matches!(result, Err(SessionError::Unauthorized)));
    }

    #[tokio::test]
    async fn one_active_session_per_commitment() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;

        h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();
        let second = h.service.create_session(&user, &commitment.id, "UTC").await;
        assert!(matches!(second, Err(SessionError::ActiveSessionExists)));
    }

    #[tokio::test]
    async fn day_slot_reopens_after_cancellation() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;

        let first = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();
        h.service.cancel_session(&first.id, &user).await.unwrap();

        // Same counting day, same commitment: allowed because the first is
        // cancelled.
        let second = h.service.create_session(&user, &commitment.id, "UTC").await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn completed_session_blocks_the_rest_of_the_day() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;

        let first = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();
        h.service.complete_session(&first.id, &user).await.unwrap();

        let second = h.service.create_session(&user, &commitment.id, "UTC").await;
        assert!(matches!(second, Err(SessionError::SessionAlreadyExistsForDay)));
    }

    #[tokio::test]
    async fn pause_resume_complete_walk_the_state_machine() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;
        let session = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();

        let paused = h.service.pause_session(&session.id, &user).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        // Completing while paused names the specific guard.
        let blocked = h.service.complete_session(&session.id, &user).await;
        assert!(matches!(blocked, Err(SessionError::PausedResumeFirst)));

        let resumed = h.service.resume_session(&session.id, &user).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::InProgress);

        let completed = h.service.complete_session(&session.id, &user).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.verification_status, VerificationStatus::Pending);
        assert!(completed.end_date.is_some());

        // Terminal states answer with their own guard errors.
        assert!(matches!(
            h.service.pause_session(&session.id, &user).await,
            Err(SessionError::AlreadyCompleted)
        ));
        assert!(matches!(
            h.service.cancel_session(&session.id, &user).await,
            Err(SessionError::AlreadyCompleted)
        ));
    }

    #[tokio::test]
    async fn double_pause_and_double_resume_are_named_conflicts() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;
        let session = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();

        assert!(matches!(
            h.service.resume_session(&session.id, &user).await,
            Err(SessionError::NotPaused)
        ));
        h.service.pause_session(&session.id, &user).await.unwrap();
        assert!(matches!(
            h.service.pause_session(&session.id, &user).await,
            Err(SessionError::AlreadyPaused)
        ));
    }

    #[tokio::test]
    async fn request_verification_enqueues_exactly_the_session() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;
        let session = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();

        // Not completed yet.
        assert!(matches!(
            h.service.request_verification(&session.id, &user).await,
            Err(SessionError::VerificationNotPending)
        ));

        h.service.complete_session(&session.id, &user).await.unwrap();
        h.service.request_verification(&session.id, &user).await.unwrap();

        let jobs = h.scheduler.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].session.id, session.id);
        assert_eq!(jobs[0].activity, ActivityType::Walk);
    }

    #[tokio::test]
    async fn verdict_write_back_is_single_shot() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;
        let session = h.service.create_session(&user, &commitment.id, "UTC").await.unwrap();
        h.service.complete_session(&session.id, &user).await.unwrap();

        let verdict = VerificationWriteBack {
            passed: false,
            fraud_detected: true,
            flagged_for_review: false,
            review_notes: Some("[gps_teleportation] gps teleportation".to_string()),
            actual_value: 12.0,
            session_duration_secs: 300.0,
        };
        let updated = h
            .service
            .apply_verification_result(&session.id, verdict.clone())
            .await
            .unwrap();
        assert_eq!(updated.verification_status, VerificationStatus::Failed);
        assert!(updated.fraud_detected);
        assert_eq!(updated.actual_value, Some(12.0));
        assert!(updated.review_notes.is_some());

        // Replay from the queue does not overwrite the recorded verdict.
        let replay = h.service.apply_verification_result(&session.id, verdict).await;
        assert!(matches!(replay, Err(SessionError::VerificationNotPending)));
    }

    #[tokio::test]
    async fn counting_day_respects_session_timezone() {
        let h = harness();
        let user = UserId::generate();
        let commitment = active_commitment(&h, user).await;

        // 05:30 UTC is the previous evening in Los Angeles.
        h.clock.set(Utc::now().date_naive().and_hms_opt(5, 30, 0).unwrap().and_utc());
        let utc_today = h.clock.now().date_naive();

        let bogus = h.service.create_session(&user, &commitment.id, "Mars/Olympus").await;
        assert!(matches!(bogus, Err(SessionError::InvalidTimezone(_))));

        let session = h
            .service
            .create_session(&user, &commitment.id, "America/Los_Angeles")
            .await
            .unwrap();
        assert_eq!(session.counting_day, utc_today.pred_opt().unwrap());
    }
}
