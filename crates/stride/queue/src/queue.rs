use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_sessions::{SchedulerError, VerificationJob, VerificationScheduler};
use stride_types::SessionId;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Worker pool tuning.
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Jobs processed at once.
    pub concurrency: usize,
    /// Attempts per job before it is reported failed.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { concurrency: 5, max_attempts: 2 }
    }
}

/// Terminal event for one job, observable by any number of subscribers.
#[derive(Clone, Debug)]
pub enum JobEvent {
    Completed { session_id: SessionId },
    Failed { session_id: SessionId, error: String },
}

impl JobEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            JobEvent::Completed { session_id } | JobEvent::Failed { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// How one verification job ended, as reported by the handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobOutcome(pub String);

/// Consumer side of the queue. The handler must be idempotent: the pool
/// retries on error and delivery is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &VerificationJob) -> Result<(), JobOutcome>;
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for job on session {0}")]
    Timeout(SessionId),

    #[error("queue event stream closed")]
    Closed,
}

/// Deduplicated verification queue.
///
/// Enqueue inserts the session id into the in-flight set and pushes the job
/// onto an unbounded channel; the dispatcher spawned by [`VerificationQueue::start`]
/// drains it under a semaphore bound. The id leaves the set right before the
/// terminal event is broadcast, so a session can be re-verified later but
/// never runs twice concurrently.
pub struct VerificationQueue {
    jobs_tx: mpsc::UnboundedSender<VerificationJob>,
    jobs_rx: Mutex<Option<mpsc::UnboundedReceiver<VerificationJob>>>,
    in_flight: Arc<Mutex<HashSet<SessionId>>>,
    events: broadcast::Sender<JobEvent>,
    config: QueueConfig,
}

/// Deterministic job id for logs and dedupe tracing.
pub(crate) fn job_id(session_id: &SessionId) -> String {
    format!("verify_{session_id}")
}

impl VerificationQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        Self {
            jobs_tx,
            jobs_rx: Mutex::new(Some(jobs_rx)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
            config,
        }
    }

    /// Spawn the dispatcher. Call once; later calls return None.
    pub fn start(&self, handler: Arc<dyn JobHandler>) -> Option<JoinHandle<()>> {
        let mut rx = self.jobs_rx.lock().ok()?.take()?;
        let in_flight = self.in_flight.clone();
        let events = self.events.clone();
        let config = self.config;
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        Some(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let in_flight = in_flight.clone();
                let events = events.clone();
                let handler = handler.clone();

                tokio::spawn(async move {
                    let session_id = job.session.id;
                    let event = run_job(handler.as_ref(), &job, config.max_attempts).await;

                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&session_id);
                    }
                    // No subscribers is fine; send only fails then.
                    let _ = events.send(event);
                    drop(permit);
                });
            }
        }))
    }

    /// Subscribe to terminal job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Block until the job for `session_id` reaches a terminal event, or
    /// `timeout` elapses. Subscribes first, so an event fired between
    /// enqueue and wait is not missed as long as wait follows enqueue on
    /// the same task.
    pub async fn wait_for(
        &self,
        session_id: SessionId,
        timeout: Duration,
    ) -> Result<JobEvent, WaitError> {
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .map_err(|_| WaitError::Timeout(session_id))?;
            match event {
                Ok(event) if event.session_id() == session_id => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(WaitError::Closed),
            }
        }
    }

    /// Sessions currently queued or running.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }
}

impl Default for VerificationQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

async fn run_job(handler: &dyn JobHandler, job: &VerificationJob, max_attempts: u32) -> JobEvent {
    let session_id = job.session.id;
    let id = job_id(&session_id);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts.max(1) {
        match handler.handle(job).await {
            Ok(()) => {
                info!(job_id = %id, attempt, "verification job completed");
                return JobEvent::Completed { session_id };
            }
            Err(JobOutcome(error)) => {
                warn!(job_id = %id, attempt, %error, "verification job attempt failed");
                last_error = error;
            }
        }
    }

    JobEvent::Failed { session_id, error: last_error }
}

#[async_trait]
impl VerificationScheduler for VerificationQueue {
    async fn enqueue_verification(&self, job: VerificationJob) -> Result<(), SchedulerError> {
        let session_id = job.session.id;
        {
            let mut set = self
                .in_flight
                .lock()
                .map_err(|_| SchedulerError("queue state lock poisoned".to_string()))?;
            if !set.insert(session_id) {
                info!(job_id = %job_id(&session_id), "duplicate enqueue ignored");
                return Ok(());
            }
        }

        self.jobs_tx
            .send(job)
            .map_err(|_| SchedulerError("queue dispatcher is gone".to_string()))?;
        info!(job_id = %job_id(&session_id), "verification job enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stride_types::{
        ActivityType, CommitmentId, Session, SessionGoal, SessionStatus, UserId,
        VerificationStatus,
    };

    fn job() -> VerificationJob {
        let now = Utc::now();
        VerificationJob {
            session: Session {
                id: SessionId::generate(),
                user_id: UserId::generate(),
                commitment_id: CommitmentId::generate(),
                timezone: "UTC".to_string(),
                counting_day: now.date_naive(),
                start_date: now,
                end_date: Some(now),
                created_at: now,
                completed_at: None,
                session_duration_secs: 0.0,
                status: SessionStatus::Completed,
                verification_status: VerificationStatus::Pending,
                session_goal: SessionGoal::Steps,
                actual_value: None,
                flagged_for_review: false,
                fraud_detected: false,
                review_notes: None,
            },
            activity: ActivityType::Walk,
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &VerificationJob) -> Result<(), JobOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(JobOutcome("transient storage hiccup".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_noop() {
        let queue = Arc::new(VerificationQueue::default());
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first: false });

        let job = job();
        let session_id = job.session.id;
        let mut events = queue.subscribe();

        queue.enqueue_verification(job.clone()).await.unwrap();
        queue.enqueue_verification(job).await.unwrap();
        queue.start(handler.clone());

        let event = queue.wait_for(session_id, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(event, JobEvent::Completed { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // Exactly one terminal event was broadcast.
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let queue = VerificationQueue::new(QueueConfig { concurrency: 1, max_attempts: 2 });
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first: true });

        let job = job();
        let session_id = job.session.id;
        queue.enqueue_verification(job).await.unwrap();
        queue.start(handler.clone());

        let event = queue.wait_for(session_id, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(event, JobEvent::Completed { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_report_failure() {
        struct AlwaysFails;

        #[async_trait]
        impl JobHandler for AlwaysFails {
            async fn handle(&self, _job: &VerificationJob) -> Result<(), JobOutcome> {
                Err(JobOutcome("backend down".to_string()))
            }
        }

        let queue = VerificationQueue::new(QueueConfig { concurrency: 1, max_attempts: 2 });
        let job = job();
        let session_id = job.session.id;
        queue.enqueue_verification(job).await.unwrap();
        queue.start(Arc::new(AlwaysFails));

        let event = queue.wait_for(session_id, Duration::from_secs(5)).await.unwrap();
        let JobEvent::Failed { error, .. } = event else {
            panic!("expected failure event");
        };
        assert_eq!(error, "backend down");
    }

    #[tokio::test]
    async fn wait_for_times_out_when_nothing_runs() {
        let queue = VerificationQueue::default();
        let result = queue
            .wait_for(SessionId::generate(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(WaitError::Timeout(_))));
    }

    #[tokio::test]
    async fn start_is_single_shot() {
        let queue = VerificationQueue::default();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first: false });
        assert!(queue.start(handler.clone()).is_some());
        assert!(queue.start(handler).is_none());
    }
}
