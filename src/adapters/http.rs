//! Direct HTTP adapter for plain audio URLs.
//!
//! Streams the response body chunk by chunk into the staging file,
//! checking for cancellation between chunks. Attributes are best-effort:
//! the title falls back to the URL's file stem.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::CancelFlag;

use super::{SourceAdapter, SourceAttributes, SourceError};

/// Adapter for locators that point directly at an audio payload
pub struct HttpAdapter {
    client: reqwest::Client,
    fetch_timeout: Duration,
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            fetch_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(fetch_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            fetch_timeout,
        }
    }
}

/// Title guess from the URL's final path segment
fn title_from_url(url: &reqwest::Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = segment.rsplit_once('.').map(|(s, _)| s).unwrap_or(segment);

    if stem.is_empty() {
        None
    } else {
        Some(stem.replace(['_', '-'], " "))
    }
}

/// Classify a transport-level reqwest failure
fn classify_transport(e: reqwest::Error) -> SourceError {
    if e.is_timeout() || e.is_connect() {
        SourceError::Unreachable(e.to_string())
    } else if e.is_builder() || e.is_request() {
        SourceError::Rejected(e.to_string())
    } else {
        SourceError::Unreachable(e.to_string())
    }
}

/// Classify a non-success HTTP status
fn classify_status(status: reqwest::StatusCode, url: &reqwest::Url) -> SourceError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SourceError::Exhausted(format!("{} from {}", status, url))
    } else if status.is_client_error() {
        SourceError::Rejected(format!("{} from {}", status, url))
    } else {
        SourceError::Unreachable(format!("{} from {}", status, url))
    }
}

#[async_trait]
impl SourceAdapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
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

        let url = reqwest::Url::parse(locator)
            .map_err(|e| SourceError::Rejected(format!("'{}': {}", locator, e)))?;

        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        let mut file = fs::File::create(dest).await?;

        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk.map_err(|e| {
                    if e.is_timeout() {
                        SourceError::Unreachable(format!("timed out reading {}", url))
                    } else {
                        SourceError::Unreachable(e.to_string())
                    }
                })?,
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            };

            match chunk {
                Some(bytes) => file.write_all(&bytes).await?,
                None => break,
            }
        }

        file.flush().await?;

        Ok(SourceAttributes {
            title: title_from_url(&url),
            artist: None,
            duration_secs: None,
        })
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        // Nothing to probe; the client is constructed locally
        Ok(())
    }
}
