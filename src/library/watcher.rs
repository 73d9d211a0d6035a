//! Media directory watcher.
//!
//! Watches the committed media directory and runs a reconcile pass once
//! the directory has settled, so files dropped in (or deleted) by hand
//! show up in the index without restarting the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::MediaFormat;

use super::index::{LibraryIndex, ReconcileReport};
use super::layout::StorageLayout;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Initial coalescing window for bursts of file events
    pub debounce_secs: u64,

    /// How long the directory must be quiet before reconciling
    pub settle_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 2,
            settle_secs: 3,
        }
    }
}

/// Watches the media directory and reconciles the index on changes
pub struct LibraryWatcher {
    config: WatcherConfig,
}

impl LibraryWatcher {
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
        }
    }

    pub fn with_config(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Watch the media directory until stopped.
    ///
    /// Emits a `ReconcileReport` for every pass that changed the index.
    pub async fn watch(
        &self,
        index: Arc<LibraryIndex>,
    ) -> Result<(mpsc::Receiver<ReconcileReport>, WatchHandle)> {
        let media_dir = index.layout().media_dir();
        if !media_dir.exists() {
            return Err(WatcherError::DirectoryNotFound(media_dir).into());
        }

        let (report_tx, report_rx) = mpsc::channel::<ReconcileReport>(16);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, index, report_tx, &mut stop_rx).await {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((
            report_rx,
            WatchHandle {
                stop_tx,
                task: handle,
            },
        ))
    }
}

impl Default for LibraryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Internal watcher loop
async fn run_watcher(
    config: WatcherConfig,
    index: Arc<LibraryIndex>,
    report_tx: mpsc::Sender<ReconcileReport>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let media_dir = index.layout().media_dir();

    // Create debounced watcher
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(Duration::from_secs(config.debounce_secs), tx)?;
    debouncer
        .watcher()
        .watch(&media_dir, RecursiveMode::NonRecursive)?;

    let settle = Duration::from_secs(config.settle_secs);
    let mut last_change: Option<Instant> = None;

    tracing::info!("Watching {} for media changes", media_dir.display());

    loop {
        // Check for stop signal
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping...");
            break;
        }

        // Check for file events (non-blocking with timeout)
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                let relevant = events.iter().any(|event| {
                    let is_media = MediaFormat::from_path(&event.path).is_some();
                    let is_staging = event
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(StorageLayout::is_staging_name)
                        .unwrap_or(false);
                    is_media && !is_staging
                });

                if relevant {
                    last_change = Some(Instant::now());
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected - continue to settle check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }

        // Reconcile once the directory has been quiet long enough
        if let Some(changed_at) = last_change {
            if changed_at.elapsed() >= settle {
                last_change = None;

                match index.reconcile().await {
                    Ok(report) => {
                        if !report.is_noop() {
                            tracing::info!(
                                recovered = report.recovered,
                                pruned = report.pruned,
                                skipped = report.skipped,
                                "Reconciled after media changes"
                            );
                            let _ = report_tx.send(report).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Reconcile after media change failed: {}", e);
                    }
                }
            }
        }

        // Small sleep to prevent busy loop
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}
