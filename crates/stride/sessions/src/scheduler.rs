use async_trait::async_trait;
use stride_types::{ActivityType, Session};
use thiserror::Error;

/// A verification job handed to the queue. The queue derives its dedupe key
/// from the session id.
#[derive(Clone, Debug)]
pub struct VerificationJob {
    pub session: Session,
    pub activity: ActivityType,
}

#[derive(Debug, Error)]
#[error("scheduler unavailable: {0}")]
pub struct SchedulerError(pub String);

/// Hand-off point between the session lifecycle and the verification worker
/// pool. Enqueueing the same session twice is a no-op on the queue side.
#[async_trait]
pub trait VerificationScheduler: Send + Sync {
    async fn enqueue_verification(&self, job: VerificationJob) -> Result<(), SchedulerError>;
}
