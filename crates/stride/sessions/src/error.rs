use stride_storage::StorageError;
use thiserror::Error;

/// Session-level failures. One variant per transition guard, so callers can
/// tell "already completed" from "not in progress" without string matching.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session belongs to another user")]
    Unauthorized,

    #[error("commitment is not active")]
    CommitmentNotActive,

    #[error("an in-progress or paused session already exists for this commitment")]
    ActiveSessionExists,

    #[error("a session already exists for this day")]
    SessionAlreadyExistsForDay,

    #[error("session is already completed")]
    AlreadyCompleted,

    #[error("session is already cancelled")]
    AlreadyCancelled,

    #[error("session is already paused")]
    AlreadyPaused,

    #[error("session is not in progress")]
    NotInProgress,

    #[error("session is not paused")]
    NotPaused,

    #[error("session is paused; resume it before completing")]
    PausedResumeFirst,

    #[error("session verification is not pending")]
    VerificationNotPending,

    #[error("not a valid IANA timezone: {0}")]
    InvalidTimezone(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("verification scheduler unavailable: {0}")]
    Scheduler(String),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation(_) => SessionError::SessionAlreadyExistsForDay,
            other => SessionError::Storage(other),
        }
    }
}
