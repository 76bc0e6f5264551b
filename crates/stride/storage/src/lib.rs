//! Persistence boundary for the Stride core.
//!
//! The service crates only ever talk to the traits in [`traits`]; the
//! in-memory adapter in [`memory`] is the deterministic reference
//! implementation used by tests. A transactional backend (e.g. PostgreSQL)
//! is expected for production source-of-truth data.

#![deny(unsafe_code)]

mod error;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStrideStorage;
pub use traits::{
    CommitmentStore, ForfeitApply, PoolStore, SampleStore, SessionStore, StrideStorage,
    TransactionStore,
};
