//! Download orchestrator.
//!
//! Accepts acquisition requests, deduplicates them by item identity,
//! bounds concurrency with a fixed worker pool, and drives each job
//! through fetch → tag → commit. Submission never blocks on the work:
//! it enqueues the job and returns a handle immediately.
//!
//! Jobs for distinct identities run in parallel; at most one live job
//! exists per identity, system-wide. A failed job never touches the
//! library, so any previously committed item stays fully servable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{self, SourceAdapter, SourceAttributes, SourceError, SourceRouter};
use crate::config::DownloadSettings;
use crate::domain::{Item, ItemId, Job, JobErrorKind, JobHandle, JobState, TagPatch, TrackTags};
use crate::library::LibraryIndex;
use crate::tagger::{self, TagError};

use super::retry::RetryPolicy;

/// Errors raised by `submit` before any job is created
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
}

/// What `status` knows about an identity
#[derive(Debug, Clone)]
pub enum StatusReport {
    /// A job (live or terminal) is known for this identity
    Job {
        job_id: Uuid,
        state: JobState,
        attempts: u32,
        requested_at: DateTime<Utc>,
    },

    /// No job is known; the identity is committed in the library
    Committed(Item),
}

/// State shared between the public handle and the worker pool
struct Shared {
    index: Arc<LibraryIndex>,
    adapter: Arc<dyn SourceAdapter>,
    settings: DownloadSettings,
    retry: RetryPolicy,

    /// One entry per identity; live entries enforce dedup, terminal
    /// entries stay queryable until the next resubmission
    jobs: Mutex<HashMap<ItemId, Arc<Job>>>,
}

/// Why a job stopped before commit
enum JobAbort {
    Cancelled,
    Failed { kind: JobErrorKind, message: String },
}

/// Download orchestrator with a fixed worker pool
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    queue_tx: mpsc::UnboundedSender<Arc<Job>>,
}

impl Orchestrator {
    /// Create an orchestrator over the given index and source adapter.
    ///
    /// Spawns the worker pool; must be called within a tokio runtime.
    /// Dropping every clone closes the queue and the workers drain out.
    pub fn new(
        index: Arc<LibraryIndex>,
        adapter: Arc<dyn SourceAdapter>,
        settings: DownloadSettings,
    ) -> Self {
        let retry = RetryPolicy::from_settings(&settings.retry);
        let workers = settings.max_concurrent.max(1);

        let shared = Arc::new(Shared {
            index,
            adapter,
            settings,
            retry,
            jobs: Mutex::new(HashMap::new()),
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Arc<Job>>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        for worker_id in 0..workers {
            let shared = shared.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(worker_loop(shared, queue_rx, worker_id));
        }

        Self { shared, queue_tx }
    }

    /// Create an orchestrator with the default yt-dlp + HTTP routing
    pub fn with_default_sources(index: Arc<LibraryIndex>, settings: DownloadSettings) -> Self {
        let router = SourceRouter::new(
            adapters::YtDlpAdapter::from_settings(&settings),
            adapters::HttpAdapter::with_timeout(settings.fetch_timeout),
        );
        Self::new(index, Arc::new(router), settings)
    }

    /// The library index this orchestrator commits into
    pub fn index(&self) -> &Arc<LibraryIndex> {
        &self.shared.index
    }

    /// Submit a locator for acquisition.
    ///
    /// Returns immediately with a handle. If a live job already exists
    /// for the same identity, that job's handle is returned instead of
    /// starting a second fetch.
    #[instrument(skip(self, overrides), fields(locator = %locator))]
    pub async fn submit(
        &self,
        locator: &str,
        overrides: TagPatch,
    ) -> Result<JobHandle, SubmitError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(SubmitError::InvalidLocator("locator is empty".to_string()));
        }
        if locator.chars().any(|c| c.is_control()) {
            return Err(SubmitError::InvalidLocator(
                "locator contains control characters".to_string(),
            ));
        }

        let id = ItemId::from_locator(locator);

        let job = {
            let mut jobs = self.shared.jobs.lock().await;

            if let Some(existing) = jobs.get(&id) {
                if existing.state().is_live() {
                    debug!(id = %id, "Deduplicated onto live job");
                    return Ok(JobHandle::new(existing.clone()));
                }
            }

            let job = Arc::new(Job::new(id.clone(), locator.to_string(), overrides));
            jobs.insert(id.clone(), job.clone());
            job
        };

        if self.queue_tx.send(job.clone()).is_err() {
            job.transition(JobState::Failed {
                kind: JobErrorKind::Storage,
                message: "orchestrator is shut down".to_string(),
            });
        } else {
            info!(id = %id, job_id = %job.job_id, "Job submitted");
        }

        Ok(JobHandle::new(job))
    }

    /// Report the job state for an identity, falling back to the
    /// committed item when no job is known
    pub async fn status(&self, id: &ItemId) -> Option<StatusReport> {
        {
            let jobs = self.shared.jobs.lock().await;
            if let Some(job) = jobs.get(id) {
                return Some(StatusReport::Job {
                    job_id: job.job_id,
                    state: job.state(),
                    attempts: job.attempts(),
                    requested_at: job.requested_at,
                });
            }
        }

        self.shared
            .index
            .lookup(id)
            .await
            .map(StatusReport::Committed)
    }

    /// Request cancellation of a live job.
    ///
    /// Pending jobs are dropped before they start; in-flight jobs get a
    /// cooperative signal. Returns false when no live job exists.
    pub async fn cancel(&self, id: &ItemId) -> bool {
        let jobs = self.shared.jobs.lock().await;
        match jobs.get(id) {
            Some(job) if job.state().is_live() => {
                info!(id = %id, job_id = %job.job_id, "Cancellation requested");
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Check that the underlying source capability is available
    pub async fn health_check(&self) -> Result<(), SourceError> {
        self.shared.adapter.health_check().await
    }
}

/// Worker loop: pull jobs in FIFO order until the queue closes
async fn worker_loop(
    shared: Arc<Shared>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Arc<Job>>>>,
    worker_id: usize,
) {
    loop {
        let job = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!(worker_id, "Worker shutting down");
            break;
        };

        shared.run_job(&job).await;
    }
}

impl Shared {
    #[instrument(skip(self, job), fields(id = %job.id, job_id = %job.job_id))]
    async fn run_job(&self, job: &Job) {
        // A pending job cancelled before a worker picked it up never starts
        if job.cancel.is_cancelled() {
            info!("Job cancelled while pending");
            job.transition(JobState::Cancelled);
            return;
        }

        job.transition(JobState::Downloading);

        let (staged, attributes) = match self.fetch_with_retry(job).await {
            Ok(fetched) => fetched,
            Err(abort) => return finish_aborted(job, abort),
        };

        if job.cancel.is_cancelled() {
            remove_staging(&staged).await;
            info!("Fetch result discarded after cancellation");
            job.transition(JobState::Cancelled);
            return;
        }

        job.transition(JobState::Tagging);

        let mut requested = job.overrides.clone().or(attributes.as_patch());
        if requested.title.is_none() {
            requested.title = Some(fallback_title(&job.locator));
        }

        let mut tags = match self.tag_with_retry(&staged, &requested).await {
            Ok(tags) => tags,
            Err(abort) => {
                remove_staging(&staged).await;
                return finish_aborted(job, abort);
            }
        };
        if tags.duration_secs.is_none() || tags.duration_secs == Some(0) {
            tags.duration_secs = attributes.duration_secs.or(tags.duration_secs);
        }

        if job.cancel.is_cancelled() {
            remove_staging(&staged).await;
            info!("Tagged result discarded after cancellation");
            job.transition(JobState::Cancelled);
            return;
        }

        match self.index.commit(job.id.clone(), &staged, &tags).await {
            Ok(item) => {
                info!(title = %item.title, size = item.size_bytes, "Job ready");
                job.transition(JobState::Ready);
            }
            Err(e) => {
                error!(error = %e, "Commit failed");
                remove_staging(&staged).await;
                job.transition(JobState::Failed {
                    kind: JobErrorKind::Storage,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Fetch into a fresh staging file, retrying transient failures
    /// with exponential backoff up to the policy's attempt bound
    async fn fetch_with_retry(&self, job: &Job) -> Result<(PathBuf, SourceAttributes), JobAbort> {
        loop {
            let attempt = job.begin_attempt();
            let extension = adapters::staging_extension(&job.locator, &self.settings.audio_format);
            let staged = self.index.layout().staging_path(&extension);

            match self.adapter.fetch(&job.locator, &staged, &job.cancel).await {
                Ok(attributes) => return Ok((staged, attributes)),
                Err(e) => {
                    remove_staging(&staged).await;

                    match e {
                        SourceError::Cancelled => return Err(JobAbort::Cancelled),
                        e if e.is_retryable() && self.retry.should_retry(attempt) => {
                            let delay = self.retry.delay_for_attempt(attempt);
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Fetch failed, retrying"
                            );

                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = job.cancel.cancelled() => return Err(JobAbort::Cancelled),
                            }
                        }
                        e => {
                            error!(attempt, error = %e, "Fetch failed permanently");
                            return Err(JobAbort::Failed {
                                kind: source_error_kind(&e),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Normalize tags; a failed write is retried exactly once
    async fn tag_with_retry(
        &self,
        staged: &Path,
        requested: &TagPatch,
    ) -> Result<TrackTags, JobAbort> {
        match tagger::normalize(staged, requested).await {
            Ok(tags) => Ok(tags),
            Err(e @ TagError::UnsupportedContainer(_)) => Err(JobAbort::Failed {
                kind: JobErrorKind::UnsupportedContainer,
                message: e.to_string(),
            }),
            Err(first) => {
                warn!(error = %first, "Tag write failed, retrying once");
                tagger::normalize(staged, requested)
                    .await
                    .map_err(|e| JobAbort::Failed {
                        kind: match e {
                            TagError::UnsupportedContainer(_) => JobErrorKind::UnsupportedContainer,
                            TagError::WriteFailed { .. } => JobErrorKind::TagWriteFailed,
                        },
                        message: e.to_string(),
                    })
            }
        }
    }
}

fn finish_aborted(job: &Job, abort: JobAbort) {
    match abort {
        JobAbort::Cancelled => {
            info!("Job cancelled");
            job.transition(JobState::Cancelled);
        }
        JobAbort::Failed { kind, message } => {
            job.transition(JobState::Failed { kind, message });
        }
    }
}

fn source_error_kind(e: &SourceError) -> JobErrorKind {
    match e {
        SourceError::Unreachable(_) => JobErrorKind::SourceUnreachable,
        SourceError::Rejected(_) => JobErrorKind::SourceRejected,
        SourceError::Exhausted(_) => JobErrorKind::SourceExhausted,
        SourceError::Io(_) | SourceError::Cancelled => JobErrorKind::Storage,
    }
}

/// Last-resort title derived from the locator itself
fn fallback_title(locator: &str) -> String {
    let tail = locator
        .rsplit(['/', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or(locator);
    let stem = tail.split(['?', '#']).next().unwrap_or(tail);
    let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);

    if stem.is_empty() {
        locator.to_string()
    } else {
        stem.replace(['_', '-'], " ")
    }
}

/// Remove a staging file left behind by a failed or cancelled stage
async fn remove_staging(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Failed to remove staging file {}: {}", path.display(), e);
        }
    }
}
