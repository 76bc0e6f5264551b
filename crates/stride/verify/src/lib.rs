//! Anti-fraud verification for Stride sessions.
//!
//! A session is verified by running eight independent checks over its raw
//! GPS, motion, and pedometer samples. One failed check marks the session
//! fraudulent; flagged checks route it to manual review without failing it.

#![deny(unsafe_code)]

pub mod checks;
pub mod constants;
mod engine;
pub mod util;

pub use engine::{VerificationEngine, VerificationOutcome, VerifyError};
