//! Source adapters for external acquisition capabilities.
//!
//! Adapters provide a unified interface for fetching a media payload
//! from an external source into a caller-supplied staging path. The
//! real fetch logic lives in the external capability (yt-dlp, or a
//! plain HTTP server); adapters wrap it and classify its failures.

pub mod http;
pub mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CancelFlag, MediaFormat, TagPatch};

// Re-export the concrete adapters
pub use http::HttpAdapter;
pub use ytdlp::YtDlpAdapter;

/// Errors from a fetch, classified for retry decisions
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network or provider failure; retryable
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    /// Invalid or unsupported locator; not retryable
    #[error("Source rejected locator: {0}")]
    Rejected(String),

    /// Rate limit or quota; retryable with backoff
    #[error("Source exhausted: {0}")]
    Exhausted(String),

    /// The fetch was cancelled cooperatively
    #[error("Fetch cancelled")]
    Cancelled,

    /// Local I/O failure while writing the staging file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the orchestrator should retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Exhausted(_))
    }
}

/// Provider-reported attributes, best-effort
#[derive(Debug, Clone, Default)]
pub struct SourceAttributes {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_secs: Option<u64>,
}

impl SourceAttributes {
    /// View the attributes as a low-priority tag patch
    pub fn as_patch(&self) -> TagPatch {
        TagPatch {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: None,
        }
    }
}

/// Trait for external source adapters
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Fetch the payload for `locator` into `dest`.
    ///
    /// Writes exactly one file at `dest` on success; the caller cleans
    /// up on any non-success path. `cancel` is checked cooperatively.
    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<SourceAttributes, SourceError>;

    /// Check that the underlying capability is available
    async fn health_check(&self) -> Result<(), SourceError>;
}

/// Routes each locator to the adapter that can serve it.
///
/// Plain `http(s)` URLs whose path ends in a known audio extension are
/// fetched directly; everything else (provider pages, search
/// expressions) goes through yt-dlp.
pub struct SourceRouter {
    ytdlp: YtDlpAdapter,
    http: HttpAdapter,
}

impl SourceRouter {
    pub fn new(ytdlp: YtDlpAdapter, http: HttpAdapter) -> Self {
        Self { ytdlp, http }
    }

    fn select(&self, locator: &str) -> &dyn SourceAdapter {
        if is_direct_audio_url(locator) {
            &self.http
        } else {
            &self.ytdlp
        }
    }
}

/// Check whether a locator is a plain audio file URL
fn is_direct_audio_url(locator: &str) -> bool {
    if !locator.starts_with("http://") && !locator.starts_with("https://") {
        return false;
    }

    // Path component only; query strings don't carry the extension
    let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
    MediaFormat::from_path(Path::new(without_query)).is_some()
}

/// Extension the staged payload will carry for a locator.
///
/// Direct audio URLs keep their own extension; provider-backed fetches
/// are converted to the configured target format.
pub fn staging_extension(locator: &str, default_format: &str) -> String {
    if is_direct_audio_url(locator) {
        let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
        Path::new(without_query)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| default_format.to_string())
    } else {
        default_format.to_string()
    }
}

#[async_trait]
impl SourceAdapter for SourceRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<SourceAttributes, SourceError> {
        self.select(locator).fetch(locator, dest, cancel).await
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        // Direct HTTP has no capability to probe; yt-dlp does
        self.ytdlp.health_check().await
    }
}
