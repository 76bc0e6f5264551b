//! The production job handler: run the pipeline, write the verdict back,
//! kick the completion check.

use crate::queue::{JobHandler, JobOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use stride_commitments::CommitmentService;
use stride_sessions::{SessionService, VerificationJob, VerificationWriteBack};
use stride_verify::VerificationEngine;
use tracing::info;

pub struct SessionVerificationHandler {
    engine: VerificationEngine,
    sessions: Arc<SessionService>,
    commitments: Arc<CommitmentService>,
}

impl SessionVerificationHandler {
    pub fn new(
        engine: VerificationEngine,
        sessions: Arc<SessionService>,
        commitments: Arc<CommitmentService>,
    ) -> Self {
        Self { engine, sessions, commitments }
    }
}

#[async_trait]
impl JobHandler for SessionVerificationHandler {
    /// A fraud verdict is a normal result, not a job failure. The job only
    /// fails on storage or pipeline errors, which the queue may retry; the
    /// pending-verification guard on write-back makes retries safe.
    async fn handle(&self, job: &VerificationJob) -> Result<(), JobOutcome> {
        let outcome = self
            .engine
            .verify(&job.session, job.activity)
            .await
            .map_err(|e| JobOutcome(e.to_string()))?;

        let passed = outcome.passed;
        self.sessions
            .apply_verification_result(
                &job.session.id,
                VerificationWriteBack {
                    passed: outcome.passed,
                    fraud_detected: outcome.fraud_detected,
                    flagged_for_review: outcome.flagged_for_review,
                    review_notes: outcome.review_notes,
                    actual_value: outcome.actual_value,
                    session_duration_secs: outcome.session_duration_secs,
                },
            )
            .await
            .map_err(|e| JobOutcome(e.to_string()))?;

        if passed {
            let check = self
                .commitments
                .check_completion(&job.session.commitment_id)
                .await
                .map_err(|e| JobOutcome(e.to_string()))?;
            info!(
                session_id = %job.session.id,
                commitment_id = %job.session.commitment_id,
                check = ?check,
                "completion check after verification"
            );
        }

        Ok(())
    }
}
