//! On-disk layout of the library.
//!
//! Two sibling directories under the library root:
//! - `media/` holds committed payloads, named `<identity>.<ext>`
//! - `tmp/` holds staging files with the `.incoming-` prefix
//!
//! Staging names can never collide with committed names, so a reader
//! resolving an identity can only ever open a fully committed file.
//! Staging and media live on the same filesystem so the commit rename
//! is atomic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs;
use uuid::Uuid;

use crate::domain::ItemId;

/// Prefix for staging files in the tmp area
const STAGING_PREFIX: &str = ".incoming-";

/// Name of the single-process lock file
const LOCK_FILE: &str = "cratedig.lock";

/// Paths of the library's backing storage
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at the given library directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of committed payloads
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    /// Staging area for in-flight downloads
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Committed path for an identity and extension
    pub fn media_path(&self, id: &ItemId, extension: &str) -> PathBuf {
        self.media_dir().join(format!("{}.{}", id, extension))
    }

    /// Fresh staging path; unique per call
    pub fn staging_path(&self, extension: &str) -> PathBuf {
        self.tmp_dir()
            .join(format!("{}{}.{}", STAGING_PREFIX, Uuid::new_v4(), extension))
    }

    /// Check whether a file name belongs to the staging area
    pub fn is_staging_name(name: &str) -> bool {
        name.starts_with(STAGING_PREFIX)
    }

    /// Create the media and tmp directories if missing
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.media_dir())
            .await
            .with_context(|| format!("Failed to create media dir under {}", self.root.display()))?;
        fs::create_dir_all(self.tmp_dir())
            .await
            .with_context(|| format!("Failed to create tmp dir under {}", self.root.display()))?;
        Ok(())
    }

    /// Remove leftover staging files from an earlier abnormal exit.
    /// Returns the number of files removed.
    pub async fn sweep_staging(&self) -> Result<usize> {
        let tmp = self.tmp_dir();
        if !tmp.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = fs::read_dir(&tmp).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if Self::is_staging_name(name) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to remove stale staging file {}: {}",
                            entry.path().display(),
                            e
                        );
                    }
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Swept stale staging files");
        }

        Ok(removed)
    }

    /// Take the exclusive process lock for this library.
    ///
    /// The lock is held for the lifetime of the returned guard. A second
    /// process attempting the same lock fails immediately instead of
    /// racing the first one's commits.
    pub fn acquire_lock(&self) -> Result<ProcessLock> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create library root {}", self.root.display()))?;

        let lock_path = self.root.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Library {} is in use by another cratedig process",
                self.root.display()
            )
        })?;

        Ok(ProcessLock { _file: file })
    }
}

/// Guard holding the exclusive library lock; released on drop
#[derive(Debug)]
pub struct ProcessLock {
    _file: std::fs::File,
}
