//! Verification job queue.
//!
//! Sessions are verified off the request path: the session service enqueues
//! a job, a bounded worker pool runs the pipeline, and interested parties
//! observe completion through a broadcast channel. Jobs are deduplicated by
//! session id, so re-submitting an already-queued session is a no-op.

#![deny(unsafe_code)]

mod handler;
mod queue;

pub use handler::SessionVerificationHandler;
pub use queue::{JobEvent, JobHandler, JobOutcome, QueueConfig, VerificationQueue, WaitError};
