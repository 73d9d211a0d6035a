//! yt-dlp adapter for provider-backed acquisition.
//!
//! Spawns the `yt-dlp` binary in extract-audio mode, pointed at a
//! staging path, and reads the provider's metadata JSON from stdout.
//! Failures are classified from the exit status and stderr text.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::DownloadSettings;
use crate::domain::CancelFlag;

use super::{SourceAdapter, SourceAttributes, SourceError};

/// yt-dlp adapter using subprocess mode
pub struct YtDlpAdapter {
    /// Binary name or path (default: "yt-dlp")
    binary_path: String,

    /// Target audio format passed to --audio-format
    audio_format: String,

    /// Timeout for a single fetch attempt
    fetch_timeout: Duration,
}

impl Default for YtDlpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpAdapter {
    /// Create an adapter with default binary path and format
    pub fn new() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            audio_format: "mp3".to_string(),
            fetch_timeout: Duration::from_secs(600),
        }
    }

    /// Create an adapter from resolved download settings
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            binary_path: settings.ytdlp_path.clone(),
            audio_format: settings.audio_format.clone(),
            fetch_timeout: settings.fetch_timeout,
        }
    }

    /// Create an adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::new()
        }
    }

    /// Output template matching `dest` after audio extraction.
    ///
    /// yt-dlp substitutes the post-conversion extension itself, so the
    /// template carries `%(ext)s` where `dest` carries the target one.
    fn output_template(dest: &Path) -> String {
        format!("{}.%(ext)s", dest.with_extension("").display())
    }
}

/// Subset of the yt-dlp info JSON we care about
#[derive(Debug, Deserialize)]
struct ProviderInfo {
    title: Option<String>,
    artist: Option<String>,
    creator: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

impl ProviderInfo {
    fn into_attributes(self) -> SourceAttributes {
        SourceAttributes {
            title: self.title,
            artist: self.artist.or(self.creator).or(self.uploader),
            duration_secs: self.duration.map(|d| d.round() as u64),
        }
    }
}

/// Classify a yt-dlp failure from its stderr text
fn classify_failure(exit_code: Option<i32>, stderr: &str) -> SourceError {
    let text = stderr.to_lowercase();

    if text.contains("unsupported url")
        || text.contains("is not a valid url")
        || text.contains("invalid url")
        || text.contains("unable to extract")
    {
        return SourceError::Rejected(summarize_stderr(stderr));
    }

    if text.contains("429")
        || text.contains("too many requests")
        || text.contains("rate-limit")
        || text.contains("rate limit")
        || text.contains("quota")
    {
        return SourceError::Exhausted(summarize_stderr(stderr));
    }

    SourceError::Unreachable(format!(
        "yt-dlp exited with code {}: {}",
        exit_code.unwrap_or(-1),
        summarize_stderr(stderr)
    ))
}

/// First meaningful stderr line, to keep error messages single-line
fn summarize_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no stderr output")
        .trim()
        .to_string()
}

#[async_trait]
impl SourceAdapter for YtDlpAdapter {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<SourceAttributes, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let template = Self::output_template(dest);

        let mut child = Command::new(&self.binary_path)
            .args([
                "--no-playlist",
                "--no-progress",
                "--extract-audio",
                "--audio-format",
                &self.audio_format,
                "--print-json",
                "-o",
                &template,
                "--",
                locator,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SourceError::Unreachable(format!(
                    "failed to spawn {}: {}",
                    self.binary_path, e
                ))
            })?;

        // Drain both pipes concurrently so the child never blocks on a
        // full pipe buffer
        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            waited = timeout(self.fetch_timeout, child.wait()) => match waited {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(SourceError::Io(e)),
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(SourceError::Unreachable(format!(
                        "yt-dlp timed out after {:?} for '{}'",
                        self.fetch_timeout, locator
                    )));
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(SourceError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(status.code(), &stderr));
        }

        if !dest.exists() {
            return Err(SourceError::Unreachable(format!(
                "yt-dlp reported success but produced no payload at {}",
                dest.display()
            )));
        }

        // --print-json emits one info line for the single entry
        let attributes = stdout
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with('{'))
            .and_then(|l| serde_json::from_str::<ProviderInfo>(l).ok())
            .map(ProviderInfo::into_attributes)
            .unwrap_or_default();

        Ok(attributes)
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                SourceError::Unreachable(format!(
                    "failed to run {} --version: {}",
                    self.binary_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Unreachable(format!(
                "yt-dlp health check failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}
