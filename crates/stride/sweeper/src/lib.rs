//! Expiration sweeper.
//!
//! Walks every active commitment whose end date has passed and forfeits the
//! ones that fell short of their session requirement. Runs on a timer in
//! production; `sweep` is also callable directly, which is how the tests
//! and any operational tooling drive it.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;
use stride_commitments::CommitmentService;
use stride_escrow::ForfeitSplit;
use stride_storage::StrideStorage;
use stride_types::{Clock, CommitmentId, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// One forfeiture performed by a sweep.
#[derive(Clone, Debug)]
pub struct SweepRecord {
    pub commitment_id: CommitmentId,
    pub user_id: UserId,
    pub stake_cents: i64,
    pub split: ForfeitSplit,
}

pub struct ExpirationSweeper {
    storage: Arc<dyn StrideStorage>,
    commitments: Arc<CommitmentService>,
    clock: Arc<dyn Clock>,
}

impl ExpirationSweeper {
    pub fn new(
        storage: Arc<dyn StrideStorage>,
        commitments: Arc<CommitmentService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, commitments, clock }
    }

    /// One pass over the expired commitments. A failure on one commitment
    /// is logged and the sweep moves on; it never aborts the whole pass.
    pub async fn sweep(&self) -> Vec<SweepRecord> {
        let now = self.clock.now();
        let expired = match self.storage.list_expired_active(now).await {
            Ok(expired) => expired,
            Err(err) => {
                error!(error = %err, "sweep could not list expired commitments");
                return Vec::new();
            }
        };

        if expired.is_empty() {
            info!("sweep found no expired commitments");
            return Vec::new();
        }

        let mut records = Vec::new();
        for commitment in expired {
            match self.commitments.forfeit_expired(&commitment).await {
                Ok(Some(split)) => records.push(SweepRecord {
                    commitment_id: commitment.id,
                    user_id: commitment.user_id,
                    stake_cents: commitment.stake_cents,
                    split,
                }),
                // Fulfilled or never staked; already logged downstream.
                Ok(None) => {}
                Err(err) => {
                    error!(
                        commitment_id = %commitment.id,
                        error = %err,
                        "sweep failed to process commitment"
                    );
                }
            }
        }

        info!(forfeited = records.len(), "sweep finished");
        records
    }

    /// Run sweeps on a fixed period until the returned handle is stopped.
    pub fn spawn(self: Arc<Self>, period: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle to a running sweeper loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
