//! Acquisition jobs and their lifecycle.
//!
//! A Job is one in-flight acquisition request. Jobs live only in process
//! memory; the library index on disk is the durable record. At most one
//! live Job exists per item identity.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use super::item::{ItemId, TagPatch};

/// Why a job failed, mirrored from the stage that produced the error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Network or provider failure (was retried)
    SourceUnreachable,

    /// Invalid or unsupported locator
    SourceRejected,

    /// Provider rate limit or quota (was retried with backoff)
    SourceExhausted,

    /// Payload is not a recognized audio container
    UnsupportedContainer,

    /// Tag envelope could not be written (was retried once)
    TagWriteFailed,

    /// Commit or staging I/O failed
    Storage,
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SourceUnreachable => "source unreachable",
            Self::SourceRejected => "source rejected",
            Self::SourceExhausted => "source exhausted",
            Self::UnsupportedContainer => "unsupported container",
            Self::TagWriteFailed => "tag write failed",
            Self::Storage => "storage error",
        };
        write!(f, "{}", s)
    }
}

/// State of an acquisition job
///
/// `Pending → Downloading → Tagging → Ready` on success;
/// any non-terminal state may move to `Failed` or `Cancelled`.
/// There are no transitions out of a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    /// Queued, waiting for a worker slot
    Pending,

    /// A worker is fetching the payload
    Downloading,

    /// Payload fetched; tags are being normalized and committed
    Tagging,

    /// Item committed and visible in the library
    Ready,

    /// Terminal failure; the prior committed item (if any) is untouched
    Failed { kind: JobErrorKind, message: String },

    /// Cancelled before commit; nothing was published
    Cancelled,
}

impl JobState {
    /// Check if the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. } | Self::Cancelled)
    }

    /// Check if the job is still live (dedup window)
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Tagging => write!(f, "tagging"),
            Self::Ready => write!(f, "ready"),
            Self::Failed { kind, message } => write!(f, "failed ({}): {}", kind, message),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Cooperative cancellation signal, checked at stage boundaries and
/// inside the source adapters
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; wakes all waiters
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One in-flight acquisition request
#[derive(Debug)]
pub struct Job {
    /// Fresh per submission; distinguishes resubmissions of one identity
    pub job_id: Uuid,

    /// Identity derived from the locator
    pub id: ItemId,

    /// The locator as submitted (trimmed)
    pub locator: String,

    /// Caller-supplied attribute overrides (win over provider values)
    pub overrides: TagPatch,

    /// When the job was submitted
    pub requested_at: DateTime<Utc>,

    /// Fetch attempts made so far
    attempts: AtomicU32,

    /// Current state, observable through `watch`
    state: watch::Sender<JobState>,

    /// Cooperative cancellation signal
    pub cancel: CancelFlag,
}

impl Job {
    /// Create a new pending job
    pub fn new(id: ItemId, locator: String, overrides: TagPatch) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            job_id: Uuid::new_v4(),
            id,
            locator,
            overrides,
            requested_at: Utc::now(),
            attempts: AtomicU32::new(0),
            state,
            cancel: CancelFlag::new(),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Transition to a new state; terminal states are never overwritten
    pub fn transition(&self, next: JobState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Record the start of a fetch attempt; returns the attempt number
    pub fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fetch attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Handle returned by `submit`; observes one job's progress
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: Arc<Job>,
    state_rx: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn new(job: Arc<Job>) -> Self {
        let state_rx = job.subscribe();
        Self { job, state_rx }
    }

    pub fn id(&self) -> &ItemId {
        &self.job.id
    }

    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }

    pub fn locator(&self) -> &str {
        &self.job.locator
    }

    /// Current state snapshot
    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.job.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(&mut self) -> JobState {
        loop {
            let current = self.state_rx.borrow().clone();
            if current.is_terminal() {
                return current;
            }
            // Sender dropped means the orchestrator is gone; report the
            // last observed state rather than hanging
            if self.state_rx.changed().await.is_err() {
                return self.state_rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            ItemId::from_locator("src://abc"),
            "src://abc".to_string(),
            TagPatch::default(),
        )
    }

    #[test]
    fn test_state_machine_happy_path() {
        let job = test_job();
        assert_eq!(job.state(), JobState::Pending);

        job.transition(JobState::Downloading);
        job.transition(JobState::Tagging);
        job.transition(JobState::Ready);
        assert_eq!(job.state(), JobState::Ready);
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let job = test_job();
        job.transition(JobState::Downloading);
        job.transition(JobState::Failed {
            kind: JobErrorKind::SourceUnreachable,
            message: "no route".to_string(),
        });

        job.transition(JobState::Ready);
        assert!(matches!(job.state(), JobState::Failed { .. }));
    }

    #[test]
    fn test_attempt_counter() {
        let job = test_job();
        assert_eq!(job.attempts(), 0);
        assert_eq!(job.begin_attempt(), 1);
        assert_eq!(job.begin_attempt(), 2);
        assert_eq!(job.attempts(), 2);
    }

    #[tokio::test]
    async fn test_handle_wait_resolves_on_terminal() {
        let job = Arc::new(test_job());
        let mut handle = JobHandle::new(job.clone());

        let waiter = tokio::spawn(async move { handle.wait().await });

        job.transition(JobState::Downloading);
        job.transition(JobState::Tagging);
        job.transition(JobState::Ready);

        assert_eq!(waiter.await.unwrap(), JobState::Ready);
    }

    #[tokio::test]
    async fn test_cancel_flag_wakes_waiters() {
        let flag = CancelFlag::new();
        let waiter_flag = flag.clone();

        let waiter = tokio::spawn(async move {
            waiter_flag.cancelled().await;
            true
        });

        // Give the waiter a chance to park first
        tokio::task::yield_now().await;
        flag.cancel();

        assert!(waiter.await.unwrap());
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_wait_resolves_immediately() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancelled().await; // must not hang
    }
}
