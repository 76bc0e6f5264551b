//! Session lifecycle for Stride commitments.
//!
//! A session walks `in_progress → {paused, completed, cancelled}` with one
//! named error per illegal transition. Completion hands the session to the
//! verification queue through the [`VerificationScheduler`] seam.

#![deny(unsafe_code)]

mod error;
mod scheduler;
mod service;

pub use error::SessionError;
pub use scheduler::{SchedulerError, VerificationJob, VerificationScheduler};
pub use service::{SessionService, VerificationWriteBack};
